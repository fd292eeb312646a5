use std::collections::VecDeque;

use crate::messages::{ChatLine, Notification};

pub const NOTIFICATION_HISTORY_CAPACITY: usize = 50;
pub const MESSAGE_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity FIFO; pushing onto a full history evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

pub type NotificationHistory = BoundedHistory<Notification>;
pub type MessageHistory = BoundedHistory<ChatLine>;

impl<T> BoundedHistory<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        BoundedHistory {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Returns the evicted entry, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    /// The last `count` entries matching `keep`, oldest first.
    pub fn recent_where<F>(&self, count: usize, keep: F) -> Vec<&T>
    where
        F: Fn(&T) -> bool,
    {
        let mut recent: Vec<&T> = self
            .entries
            .iter()
            .rev()
            .filter(|entry| keep(entry))
            .take(count)
            .collect();
        recent.reverse();
        recent
    }
}

impl NotificationHistory {
    pub fn notifications() -> Self {
        Self::with_capacity(NOTIFICATION_HISTORY_CAPACITY)
    }
}

impl MessageHistory {
    pub fn messages() -> Self {
        Self::with_capacity(MESSAGE_HISTORY_CAPACITY)
    }

    pub fn recent_in_room(&self, room: &str, count: usize) -> Vec<ChatLine> {
        self.recent_where(count, |line| line.room == room)
            .into_iter()
            .cloned()
            .collect()
    }
}

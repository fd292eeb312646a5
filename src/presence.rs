use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::messages::{clock_time, PresenceStatus};

pub const UNKNOWN_STATUS: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub username: String,
    pub status: PresenceStatus,
    pub updated_at: DateTime<Local>,
}

impl PresenceRecord {
    pub fn updated_clock(&self) -> String {
        clock_time(self.updated_at)
    }
}

/// Last reported status per username. Passive: freshness is the client's job,
/// entries live as long as the process.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: HashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts with the current time. Returns the previous status, if any.
    pub fn set_status(&mut self, username: &str, status: PresenceStatus) -> Option<PresenceStatus> {
        let record = PresenceRecord {
            username: username.to_string(),
            status,
            updated_at: Local::now(),
        };
        self.records
            .insert(username.to_string(), record)
            .map(|previous| previous.status)
    }

    pub fn get_status(&self, username: &str) -> Option<PresenceStatus> {
        self.records.get(username).map(|record| record.status)
    }

    pub fn record(&self, username: &str) -> Option<&PresenceRecord> {
        self.records.get(username)
    }

    /// Status as shown to clients, with the sentinel for never-reported users.
    pub fn describe(&self, username: &str) -> &'static str {
        self.get_status(username)
            .map_or(UNKNOWN_STATUS, PresenceStatus::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_reported() {
        let tracker = PresenceTracker::new();
        assert_eq!(tracker.get_status("alice"), None);
        assert_eq!(tracker.describe("alice"), UNKNOWN_STATUS);
    }

    #[test]
    fn upsert_in_place() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.set_status("alice", PresenceStatus::Online), None);
        let first = tracker.record("alice").unwrap().updated_at;

        assert_eq!(
            tracker.set_status("alice", PresenceStatus::Typing),
            Some(PresenceStatus::Online)
        );
        assert_eq!(tracker.get_status("alice"), Some(PresenceStatus::Typing));
        assert_eq!(tracker.describe("alice"), "typing");
        assert!(tracker.record("alice").unwrap().updated_at >= first);
    }
}

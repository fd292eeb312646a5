use std::collections::{BTreeMap, BTreeSet};

use crate::client::ConnId;

#[derive(Debug, Default)]
pub struct Room {
    pub name: String,
    members: BTreeSet<ConnId>,
}

impl Room {
    fn new(name: &str) -> Self {
        Room {
            name: name.to_string(),
            members: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Room name -> members. Owned by the hub's control loop, which is the only
/// writer, so no locking happens here. Broadcasts iterate a snapshot taken
/// with [`RoomRegistry::members_of`].
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add, creating the room on first join. Returns the member count.
    pub fn join(&mut self, room: &str, id: ConnId) -> usize {
        let entry = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| Room::new(room));
        entry.members.insert(id);
        entry.len()
    }

    /// Idempotent remove. Returns the remaining member count (0 for unknown rooms).
    /// The room itself stays until [`RoomRegistry::delete`] is called.
    pub fn leave(&mut self, room: &str, id: &ConnId) -> usize {
        match self.rooms.get_mut(room) {
            Some(entry) => {
                entry.members.remove(id);
                entry.len()
            }
            None => 0,
        }
    }

    /// Drops the room entry if it has no members. Returns whether it was removed.
    pub fn delete(&mut self, room: &str) -> bool {
        if self.rooms.get(room).is_some_and(Room::is_empty) {
            self.rooms.remove(room);
            return true;
        }
        false
    }

    pub fn members_of(&self, room: &str) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|entry| entry.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, Room::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.rooms
            .iter()
            .map(|(name, room)| (name.clone(), room.len()))
            .collect()
    }

    /// Every member of every room, room by room.
    pub fn all_members(&self) -> Vec<ConnId> {
        self.rooms
            .values()
            .flat_map(|room| room.members.iter().copied())
            .collect()
    }
}

//! Target resolution and non-blocking fan-out.
//!
//! The router never evicts on its own: it reports which clients failed to take
//! a message and the hub turns those into unregisters.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::client::{ClientHandle, ConnId, Enqueue, Outbound};
use crate::error::HubError;
use crate::messages::{ServerMessage, Target};
use crate::room::RoomRegistry;

/// A registered client as the hub sees it.
#[derive(Debug)]
pub struct Member {
    pub handle: ClientHandle,
    /// `None` for presence watchers, which sit in no room.
    pub room: Option<String>,
}

pub type Members = HashMap<ConnId, Member>;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Clients whose queue was full or closed; the caller must evict them.
    pub failed: Vec<ConnId>,
}

/// Resolves a target selector to concrete connection ids.
/// `user:` yields at most one client, the first room member with that name.
pub fn resolve(target: &Target, rooms: &RoomRegistry, members: &Members) -> Vec<ConnId> {
    match target {
        Target::All => rooms.all_members(),
        Target::Room(name) => rooms.members_of(name),
        Target::User(name) => rooms
            .all_members()
            .into_iter()
            .find(|id| members.get(id).is_some_and(|m| m.handle.username == *name))
            .into_iter()
            .collect(),
    }
}

/// Offers `message` to every listed client without waiting.
pub fn deliver(targets: &[ConnId], message: ServerMessage, members: &Members) -> Delivery {
    let message: Outbound = Arc::new(message);
    let mut delivery = Delivery::default();

    for id in targets {
        let Some(member) = members.get(id) else {
            continue;
        };
        match member.handle.try_send(Arc::clone(&message)) {
            Enqueue::Sent => delivery.delivered += 1,
            Enqueue::Full => {
                warn!(
                    "{}, dropping {}",
                    HubError::SlowConsumer(*id),
                    member.handle.username
                );
                delivery.failed.push(*id);
            }
            Enqueue::Closed => {
                debug!("client {} ({}) queue already closed", member.handle.username, id);
                delivery.failed.push(*id);
            }
        }
    }

    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transport;

    fn add(
        rooms: &mut RoomRegistry,
        members: &mut Members,
        name: &str,
        room: &str,
        capacity: usize,
    ) -> (ConnId, tokio::sync::mpsc::Receiver<Outbound>) {
        let (handle, rx) = ClientHandle::channel(name, Transport::WebSocket, capacity);
        let id = handle.id;
        rooms.join(room, id);
        members.insert(
            id,
            Member {
                handle,
                room: Some(room.to_string()),
            },
        );
        (id, rx)
    }

    #[test]
    fn resolves_each_selector() {
        let mut rooms = RoomRegistry::new();
        let mut members = Members::new();
        let (alice, _a) = add(&mut rooms, &mut members, "alice", "general", 4);
        let (bob, _b) = add(&mut rooms, &mut members, "bob", "general", 4);
        let (carol, _c) = add(&mut rooms, &mut members, "carol", "other", 4);

        let mut all = resolve(&Target::All, &rooms, &members);
        all.sort();
        let mut expected = vec![alice, bob, carol];
        expected.sort();
        assert_eq!(all, expected);

        let mut general = resolve(&Target::room("general"), &rooms, &members);
        general.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(general, expected);

        assert_eq!(resolve(&Target::user("carol"), &rooms, &members), vec![carol]);
        assert!(resolve(&Target::user("dave"), &rooms, &members).is_empty());
        assert!(resolve(&Target::room("missing"), &rooms, &members).is_empty());
    }

    #[test]
    fn full_queue_is_reported_not_waited_on() {
        let mut rooms = RoomRegistry::new();
        let mut members = Members::new();
        let (slow, _slow_rx) = add(&mut rooms, &mut members, "slow", "general", 1);
        let (fast, mut fast_rx) = add(&mut rooms, &mut members, "fast", "general", 8);
        let targets = vec![slow, fast];

        let first = deliver(&targets, ServerMessage::Ping, &members);
        assert_eq!(first.delivered, 2);
        assert!(first.failed.is_empty());

        let second = deliver(&targets, ServerMessage::Ping, &members);
        assert_eq!(second.delivered, 1);
        assert_eq!(second.failed, vec![slow]);

        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn closed_queue_is_reported() {
        let mut rooms = RoomRegistry::new();
        let mut members = Members::new();
        let (gone, rx) = add(&mut rooms, &mut members, "gone", "general", 4);
        drop(rx);

        let delivery = deliver(&[gone], ServerMessage::Ping, &members);
        assert_eq!(delivery.delivered, 0);
        assert_eq!(delivery.failed, vec![gone]);
    }
}

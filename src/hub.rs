//! The hub: one control loop owning rooms, presence and histories.
//!
//! Adapters hold a cloneable [`Hub`] handle and submit commands over an
//! unbounded queue, so submitting never blocks and commands are applied in
//! submission order. A `register` (join notice and replay included) is fully
//! done before any later command is looked at.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::{ClientHandle, ConnId, Enqueue};
use crate::error::{HubError, Result};
use crate::history::{MessageHistory, NotificationHistory};
use crate::messages::{
    Body, HubStats, Message, PresenceStatus, ServerMessage, Target, UserPresence,
};
use crate::presence::{PresenceRecord, PresenceTracker};
use crate::protocol::{ClientCommand, COMMAND_HELP};
use crate::room::RoomRegistry;
use crate::router::{self, Member, Members};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Chat lines of the joined room replayed to a newcomer.
    pub history_replay: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig { history_replay: 20 }
    }
}

enum Command {
    Register {
        client: ClientHandle,
        room: Option<String>,
        done: oneshot::Sender<bool>,
    },
    Unregister {
        id: ConnId,
    },
    Publish {
        message: Message,
        ack: Option<oneshot::Sender<usize>>,
    },
    Chat {
        from: ConnId,
        text: String,
    },
    ReportStatus {
        username: String,
        status: PresenceStatus,
    },
    Client {
        from: ConnId,
        command: ClientCommand,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Presence {
        username: String,
        reply: oneshot::Sender<Option<PresenceRecord>>,
    },
    Shutdown,
}

/// Cheap handle to the control loop.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
}

impl Hub {
    /// Spawns the control loop on the current runtime.
    pub fn start(config: HubConfig) -> (Hub, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = HubState::new(config);
        let task = tokio::spawn(state.run(rx));
        (Hub { tx }, task)
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| HubError::HubClosed)
    }

    /// Adds the client to `room` (a presence watcher when `None`).
    /// Resolves to `false` if a client with the same id is already registered.
    pub async fn register(&self, client: ClientHandle, room: Option<String>) -> Result<bool> {
        let (done, registered) = oneshot::channel();
        self.submit(Command::Register { client, room, done })?;
        registered.await.map_err(|_| HubError::HubClosed)
    }

    /// Idempotent. Safe to call from any exit path, including after shutdown.
    pub fn unregister(&self, id: ConnId) {
        if self.submit(Command::Unregister { id }).is_err() {
            debug!("hub gone, unregister of {id} skipped");
        }
    }

    pub fn publish(&self, message: Message) -> Result<()> {
        self.submit(Command::Publish { message, ack: None })
    }

    /// Like [`Hub::publish`], resolving to the number of clients that got it.
    pub async fn publish_acked(&self, message: Message) -> Result<usize> {
        let (ack, delivered) = oneshot::channel();
        self.submit(Command::Publish {
            message,
            ack: Some(ack),
        })?;
        delivered.await.map_err(|_| HubError::HubClosed)
    }

    /// Chat from a registered client into its current room. Dropped by the
    /// hub if `from` is no longer a member, e.g. after eviction.
    pub fn chat(&self, from: ConnId, text: impl Into<String>) -> Result<()> {
        self.submit(Command::Chat {
            from,
            text: text.into(),
        })
    }

    pub fn report_status(&self, username: &str, status: PresenceStatus) -> Result<()> {
        self.submit(Command::ReportStatus {
            username: username.to_string(),
            status,
        })
    }

    /// Runs a slash command on behalf of `from`; the answer lands in its queue.
    pub fn command(&self, from: ConnId, command: ClientCommand) -> Result<()> {
        self.submit(Command::Client { from, command })
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, stats) = oneshot::channel();
        self.submit(Command::Stats { reply })?;
        stats.await.map_err(|_| HubError::HubClosed)
    }

    pub async fn presence(&self, username: &str) -> Result<Option<PresenceRecord>> {
        let (reply, record) = oneshot::channel();
        self.submit(Command::Presence {
            username: username.to_string(),
            reply,
        })?;
        record.await.map_err(|_| HubError::HubClosed)
    }

    /// Stops the loop. Every outbound queue is closed when its state drops.
    pub fn shutdown(&self) {
        let _ = self.submit(Command::Shutdown);
    }
}

struct HubState {
    rooms: RoomRegistry,
    presence: PresenceTracker,
    members: Members,
    notifications: NotificationHistory,
    messages: MessageHistory,
    config: HubConfig,
}

impl HubState {
    fn new(config: HubConfig) -> Self {
        HubState {
            rooms: RoomRegistry::new(),
            presence: PresenceTracker::new(),
            members: Members::new(),
            notifications: NotificationHistory::notifications(),
            messages: MessageHistory::messages(),
            config,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("hub control loop started");
        while let Some(command) = rx.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        info!(
            "hub control loop stopped, closing {} client queue(s)",
            self.members.len()
        );
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Register { client, room, done } => {
                let registered = self.register(client, room);
                let _ = done.send(registered);
            }
            Command::Unregister { id } => self.unregister(id),
            Command::Publish { message, ack } => {
                let delivered = self.publish(&message);
                if let Some(ack) = ack {
                    let _ = ack.send(delivered);
                }
            }
            Command::Chat { from, text } => self.chat(from, text),
            Command::ReportStatus { username, status } => self.report_status(&username, status),
            Command::Client { from, command } => self.client_command(from, command),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Presence { username, reply } => {
                let _ = reply.send(self.presence.record(&username).cloned());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn register(&mut self, client: ClientHandle, room: Option<String>) -> bool {
        let id = client.id;
        if self.members.contains_key(&id) {
            warn!("client {} ({id}) is already registered, ignoring", client.username);
            return false;
        }
        let username = client.username.clone();
        self.presence.set_status(&username, PresenceStatus::Online);

        let Some(room) = room else {
            info!("{} client {username} ({id}) watching presence", client.transport);
            self.members.insert(id, Member { handle: client, room: None });
            return true;
        };

        let count = self.rooms.join(&room, id);
        if count == 1 {
            info!("Created new room: {room}");
        }
        info!(
            "{} client {username} joined room {room} (Total: {count})",
            client.transport
        );
        self.members.insert(
            id,
            Member {
                handle: client,
                room: Some(room.clone()),
            },
        );

        let joined = ServerMessage::system(&room, &username, format!("{username} joined the room"));
        self.fanout(&self.rooms.members_of(&room), joined);
        if self.rooms.contains(&room) {
            let online = user_count_notice(&room, self.rooms.member_count(&room));
            self.fanout(&self.rooms.members_of(&room), online);
        }

        if self.members.contains_key(&id) {
            self.replay(id, &username, &room);
        }
        true
    }

    /// Sends recent room chat and matching notifications to a newcomer.
    /// Replay is best effort: a full queue stops it instead of evicting.
    fn replay(&mut self, id: ConnId, username: &str, room: &str) {
        let chat = self
            .messages
            .recent_in_room(room, self.config.history_replay)
            .into_iter()
            .map(ServerMessage::Chat);
        let notifications = self
            .notifications
            .iter()
            .filter(|n| n.target.matches(username, Some(room)))
            .cloned()
            .map(ServerMessage::Notification);
        let backlog: Vec<ServerMessage> = chat.chain(notifications).collect();
        if backlog.is_empty() {
            return;
        }

        let Some(member) = self.members.get(&id) else {
            return;
        };
        let total = backlog.len();
        let mut sent = 0;
        let mut closed = false;
        for message in backlog {
            match member.handle.try_send(message.into()) {
                Enqueue::Sent => sent += 1,
                Enqueue::Full => break,
                Enqueue::Closed => {
                    closed = true;
                    break;
                }
            }
        }
        debug!("replayed {sent}/{total} history entries to {username}");
        if closed {
            self.unregister(id);
        }
    }

    /// Removes clients, cascading to anyone who cannot take the "left" notice.
    fn unregister(&mut self, id: ConnId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            // Already gone: no second notice, no count change.
            let Some(Member { handle, room }) = self.members.remove(&id) else {
                continue;
            };
            let username = handle.username;
            let Some(room) = room else {
                info!("presence watcher {username} ({id}) removed");
                continue;
            };

            let remaining = self.rooms.leave(&room, &id);
            info!("Client {username} left room {room} (Remaining: {remaining})");
            if remaining == 0 {
                self.rooms.delete(&room);
                info!("Deleted empty room: {room}");
                continue;
            }

            let left = ServerMessage::system(&room, &username, format!("{username} left the room"));
            let delivery = router::deliver(&self.rooms.members_of(&room), left, &self.members);
            pending.extend(delivery.failed);

            let online = user_count_notice(&room, self.rooms.member_count(&room));
            let delivery = router::deliver(&self.rooms.members_of(&room), online, &self.members);
            pending.extend(delivery.failed);
        }
    }

    /// Delivers without blocking and evicts whoever could not keep up.
    fn fanout(&mut self, targets: &[ConnId], message: ServerMessage) -> usize {
        let delivery = router::deliver(targets, message, &self.members);
        for id in delivery.failed {
            self.unregister(id);
        }
        delivery.delivered
    }

    fn publish(&mut self, message: &Message) -> usize {
        let wire = message.to_wire();
        match (&message.body, &wire) {
            (Body::Chat(_), ServerMessage::Chat(line)) => {
                self.messages.push(line.clone());
            }
            (Body::Notification(notification), _) => {
                self.notifications.push(notification.clone());
                info!(
                    "notification {} queued for {} (history: {})",
                    notification.id,
                    notification.target,
                    self.notifications.len()
                );
            }
            _ => {}
        }

        let targets = router::resolve(&message.target, &self.rooms, &self.members);
        if targets.is_empty() {
            debug!("{}", HubError::TargetNotFound(message.target.to_string()));
            return 0;
        }
        self.fanout(&targets, wire)
    }

    fn chat(&mut self, from: ConnId, text: String) {
        let Some(member) = self.members.get(&from) else {
            debug!("chat from {from} after it left, dropping");
            return;
        };
        let Some(room) = member.room.clone() else {
            debug!("chat from presence watcher {from}, dropping");
            return;
        };
        let message = Message::chat(&member.handle.username, &room, text);
        self.publish(&message);
    }

    /// Records the status and tells room peers and presence watchers,
    /// never the reporting user itself.
    fn report_status(&mut self, username: &str, status: PresenceStatus) {
        self.presence.set_status(username, status);

        let mut rooms: BTreeSet<&str> = BTreeSet::new();
        for member in self.members.values() {
            if member.handle.username == username {
                if let Some(room) = member.room.as_deref() {
                    rooms.insert(room);
                }
            }
        }

        let mut targets: BTreeSet<ConnId> = rooms
            .iter()
            .flat_map(|room| self.rooms.members_of(room))
            .collect();
        targets.extend(
            self.members
                .iter()
                .filter(|(_, member)| member.room.is_none())
                .map(|(id, _)| *id),
        );
        targets.retain(|id| {
            self.members
                .get(id)
                .is_some_and(|member| member.handle.username != username)
        });

        let room = rooms.first().map(|room| (*room).to_string()).unwrap_or_default();
        info!("{username} is now {status} ({} recipients)", targets.len());
        let message = Message::new(username, Target::Room(room), Body::Status(status));
        let targets: Vec<ConnId> = targets.into_iter().collect();
        self.fanout(&targets, message.to_wire());
    }

    fn client_command(&mut self, from: ConnId, command: ClientCommand) {
        let Some(member) = self.members.get(&from) else {
            debug!("command {command:?} from unknown client {from}, ignoring");
            return;
        };
        let username = member.handle.username.clone();
        let room = member.room.clone().unwrap_or_default();

        let reply = match command {
            ClientCommand::Quit => {
                self.unregister(from);
                return;
            }
            ClientCommand::Users => self.user_list(&room),
            ClientCommand::Stats => {
                let stats = self.stats();
                ServerMessage::Stats {
                    total_users: stats.total_users,
                    total_rooms: stats.total_rooms,
                    room_details: stats.room_details,
                }
            }
            ClientCommand::Rooms => ServerMessage::Rooms {
                total_rooms: self.rooms.room_count(),
                rooms: self.rooms.names(),
            },
            ClientCommand::History(count) => {
                let messages = self.messages.recent_in_room(&room, count);
                ServerMessage::History {
                    room,
                    count: messages.len(),
                    messages,
                }
            }
            ClientCommand::Status(Some(status)) => {
                self.report_status(&username, status);
                self.presence_of(&username)
            }
            ClientCommand::Status(None) => self.presence_of(&username),
            ClientCommand::Unknown(name) => {
                debug!("unknown command {name} from {username}");
                ServerMessage::system(
                    &room,
                    "",
                    format!("Unknown command: {name}. Available: {COMMAND_HELP}"),
                )
            }
            ClientCommand::Usage(usage) => ServerMessage::system(&room, "", usage),
        };

        if self.members.contains_key(&from) {
            self.fanout(&[from], reply);
        }
    }

    fn user_list(&self, room: &str) -> ServerMessage {
        let mut users: Vec<UserPresence> = self
            .rooms
            .members_of(room)
            .iter()
            .filter_map(|id| self.members.get(id))
            .map(|member| UserPresence {
                username: member.handle.username.clone(),
                status: self.presence.describe(&member.handle.username).to_string(),
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        ServerMessage::UserList {
            room: room.to_string(),
            user_count: users.len(),
            users,
        }
    }

    fn presence_of(&self, username: &str) -> ServerMessage {
        ServerMessage::Presence {
            username: username.to_string(),
            status: self.presence.describe(username).to_string(),
            updated_at: self.presence.record(username).map(PresenceRecord::updated_clock),
        }
    }

    fn stats(&self) -> HubStats {
        let room_details = self.rooms.counts();
        HubStats {
            total_users: room_details.values().sum(),
            total_rooms: room_details.len(),
            room_details,
            presence_watchers: self.members.values().filter(|m| m.room.is_none()).count(),
            notification_history: self.notifications.len(),
            message_history: self.messages.len(),
        }
    }
}

fn user_count_notice(room: &str, count: usize) -> ServerMessage {
    ServerMessage::system(room, "", format!("Users online: {count}"))
}

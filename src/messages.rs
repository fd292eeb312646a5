use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// `HH:MM:SS` in local time, the format every chat line carries.
pub fn clock_time(at: DateTime<Local>) -> String {
    at.format("%H:%M:%S").to_string()
}

pub fn now_clock() -> String {
    clock_time(Local::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Typing,
    Away,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Typing => "typing",
            PresenceStatus::Away => "away",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(PresenceStatus::Online),
            "typing" => Ok(PresenceStatus::Typing),
            "away" => Ok(PresenceStatus::Away),
            other => Err(HubError::protocol(format!("unknown status {other:?}"))),
        }
    }
}

/// Routing key of a message: `all`, `room:<name>` or `user:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    All,
    Room(String),
    User(String),
}

impl Target {
    pub fn room(name: impl Into<String>) -> Self {
        Target::Room(name.into())
    }

    pub fn user(name: impl Into<String>) -> Self {
        Target::User(name.into())
    }

    pub fn room_name(&self) -> Option<&str> {
        match self {
            Target::Room(name) => Some(name),
            _ => None,
        }
    }

    /// Whether a client named `username` sitting in `room` is addressed.
    pub fn matches(&self, username: &str, room: Option<&str>) -> bool {
        match self {
            Target::All => true,
            Target::Room(name) => room == Some(name.as_str()),
            Target::User(name) => name == username,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Room(name) => write!(f, "room:{name}"),
            Target::User(name) => write!(f, "user:{name}"),
        }
    }
}

impl FromStr for Target {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "all" {
            return Ok(Target::All);
        }
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| HubError::protocol(format!("invalid target {s:?}")))?;
        if name.is_empty() {
            return Err(HubError::protocol(format!("empty name in target {s:?}")));
        }
        match kind {
            "room" => Ok(Target::room(name)),
            "user" => Ok(Target::user(name)),
            _ => Err(HubError::protocol(format!("invalid target {s:?}"))),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// Admin notification, stored in the notification history and replayed to newcomers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub target: Target,
}

/// One line of room traffic as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub room: String,
    pub username: String,
    pub text: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub username: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub total_users: usize,
    pub total_rooms: usize,
    pub room_details: BTreeMap<String, usize>,
    pub presence_watchers: usize,
    pub notification_history: usize,
    pub message_history: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Chat(ChatLine),
    System(ChatLine),
    Status(ChatLine),
    Notification(Notification),
    UserList {
        room: String,
        user_count: usize,
        users: Vec<UserPresence>,
    },
    Stats {
        total_users: usize,
        total_rooms: usize,
        room_details: BTreeMap<String, usize>,
    },
    Rooms {
        total_rooms: usize,
        rooms: Vec<String>,
    },
    History {
        room: String,
        count: usize,
        messages: Vec<ChatLine>,
    },
    Presence {
        username: String,
        status: String,
        updated_at: Option<String>,
    },
    Ping,
}

impl ServerMessage {
    pub fn system(room: &str, username: &str, text: impl Into<String>) -> Self {
        ServerMessage::System(ChatLine {
            room: room.to_string(),
            username: username.to_string(),
            text: text.into(),
            time: now_clock(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Chat(_) => "chat",
            ServerMessage::System(_) => "system",
            ServerMessage::Status(_) => "status",
            ServerMessage::Notification(_) => "notification",
            ServerMessage::UserList { .. } => "user_list",
            ServerMessage::Stats { .. } => "stats",
            ServerMessage::Rooms { .. } => "rooms",
            ServerMessage::History { .. } => "history",
            ServerMessage::Presence { .. } => "presence",
            ServerMessage::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Chat(String),
    System(String),
    Status(PresenceStatus),
    Notification(Notification),
}

/// A routed message. Immutable once built; adapters hand it to the hub,
/// the hub turns it into a [`ServerMessage`] once per fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub origin: String,
    pub target: Target,
    pub body: Body,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(origin: impl Into<String>, target: Target, body: Body) -> Self {
        Message {
            origin: origin.into(),
            target,
            body,
            timestamp: Local::now(),
        }
    }

    pub fn chat(username: &str, room: &str, text: impl Into<String>) -> Self {
        Message::new(username, Target::room(room), Body::Chat(text.into()))
    }

    pub fn notification(notification: Notification) -> Self {
        Message::new(
            "admin",
            notification.target.clone(),
            Body::Notification(notification),
        )
    }

    pub fn to_wire(&self) -> ServerMessage {
        let line = |text: String| ChatLine {
            room: self.target.room_name().unwrap_or_default().to_string(),
            username: self.origin.clone(),
            text,
            time: clock_time(self.timestamp),
        };
        match &self.body {
            Body::Chat(text) => ServerMessage::Chat(line(text.clone())),
            Body::System(text) => ServerMessage::System(line(text.clone())),
            Body::Status(status) => ServerMessage::Status(line(status.to_string())),
            Body::Notification(notification) => ServerMessage::Notification(notification.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_parses_and_prints() {
        assert_eq!("all".parse::<Target>().unwrap(), Target::All);
        assert_eq!(
            "room:general".parse::<Target>().unwrap(),
            Target::room("general")
        );
        assert_eq!("user:bob".parse::<Target>().unwrap(), Target::user("bob"));
        assert_eq!(Target::room("x").to_string(), "room:x");
        assert!("room:".parse::<Target>().is_err());
        assert!("everyone".parse::<Target>().is_err());
        assert!("group:x".parse::<Target>().is_err());
    }

    #[test]
    fn target_matching() {
        assert!(Target::All.matches("a", None));
        assert!(Target::room("g").matches("a", Some("g")));
        assert!(!Target::room("g").matches("a", Some("other")));
        assert!(!Target::room("g").matches("a", None));
        assert!(Target::user("a").matches("a", Some("g")));
        assert!(!Target::user("a").matches("b", Some("g")));
    }

    #[test]
    fn chat_wire_shape() {
        let msg = Message::chat("Bob", "general", "hi").to_wire();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["username"], "Bob");
        assert_eq!(value["room"], "general");
        assert_eq!(value["text"], "hi");
        assert_eq!(value["time"].as_str().unwrap().len(), 8);
    }

    #[test]
    fn notification_wire_shape() {
        let notification: Notification = serde_json::from_value(json!({
            "id": "n1",
            "level": "warning",
            "title": "Heads up",
            "message": "restart at noon",
            "timestamp": "2024-01-01T12:00:00Z",
            "target": "room:general",
        }))
        .unwrap();
        assert_eq!(notification.target, Target::room("general"));

        let value = serde_json::to_value(ServerMessage::Notification(notification)).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["target"], "room:general");
        assert_eq!(value["level"], "warning");
    }

    #[test]
    fn bad_target_fails_deserialization() {
        let result = serde_json::from_value::<Notification>(json!({
            "id": "n1",
            "level": "info",
            "title": "",
            "message": "x",
            "timestamp": "2024-01-01T12:00:00Z",
            "target": "nowhere",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn ping_is_bare_tag() {
        let text = serde_json::to_string(&ServerMessage::Ping).unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Typing".parse::<PresenceStatus>().unwrap(), PresenceStatus::Typing);
        assert!("busy".parse::<PresenceStatus>().is_err());
    }
}

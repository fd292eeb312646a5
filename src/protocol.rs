//! Inbound decoding shared by every transport.
//!
//! A frame is first reduced to its text (JSON object with a `text` field, or a
//! raw line), then classified as chat or a slash command. `STATUS:` datagrams
//! have their own compact codec.

use serde::Deserialize;

use crate::error::{HubError, Result};
use crate::messages::{PresenceStatus, ServerMessage};

pub const DEFAULT_HISTORY_COUNT: usize = 10;
pub const COMMAND_HELP: &str = "/users, /stats, /rooms, /history <count>, /status [online|typing|away], /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `/status` alone queries the caller's own presence.
    Status(Option<PresenceStatus>),
    History(usize),
    Quit,
    Users,
    Stats,
    Rooms,
    Unknown(String),
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chat(String),
    Command(ClientCommand),
}

/// Client frame shape. Everything but `text` is ignored; the server
/// stamps username, room, type and time itself.
#[derive(Deserialize)]
struct InboundFrame {
    text: String,
}

/// Decodes a WebSocket text frame.
pub fn decode_json(frame: &str) -> Result<Inbound> {
    let frame: InboundFrame = serde_json::from_str(frame)
        .map_err(|e| HubError::protocol(format!("malformed frame: {e}")))?;
    classify(&frame.text)
}

/// Decodes one TCP line: a JSON frame if it looks like one, raw text otherwise.
pub fn decode_line(line: &str) -> Result<Inbound> {
    let line = line.trim();
    if line.starts_with('{') {
        decode_json(line)
    } else {
        classify(line)
    }
}

pub fn classify(text: &str) -> Result<Inbound> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HubError::protocol("empty message"));
    }
    if text.starts_with('/') {
        Ok(Inbound::Command(parse_command(text)))
    } else {
        Ok(Inbound::Chat(text.to_string()))
    }
}

pub fn parse_command(text: &str) -> ClientCommand {
    let mut parts = text.split_whitespace();
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();

    match name.as_str() {
        "/users" => ClientCommand::Users,
        "/stats" => ClientCommand::Stats,
        "/rooms" => ClientCommand::Rooms,
        "/quit" => ClientCommand::Quit,
        "/history" => match arg.map(str::parse::<usize>) {
            None => ClientCommand::History(DEFAULT_HISTORY_COUNT),
            Some(Ok(count)) if count > 0 => ClientCommand::History(count),
            Some(_) => ClientCommand::Usage("Usage: /history <count>"),
        },
        "/status" => match arg.map(str::parse::<PresenceStatus>) {
            None => ClientCommand::Status(None),
            Some(Ok(status)) => ClientCommand::Status(Some(status)),
            Some(Err(_)) => ClientCommand::Usage("Usage: /status <online|typing|away>"),
        },
        _ => ClientCommand::Unknown(name),
    }
}

/// Parses `STATUS:<user>` or `STATUS:<user>:<status>`.
pub fn decode_status_datagram(data: &[u8]) -> Result<(String, PresenceStatus)> {
    let text = std::str::from_utf8(data)
        .map_err(|_| HubError::protocol("datagram is not utf-8"))?
        .trim();
    let mut parts = text.splitn(3, ':');

    if parts.next() != Some("STATUS") {
        return Err(HubError::protocol(format!("unexpected datagram {text:?}")));
    }
    let username = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| HubError::protocol("datagram without username"))?;
    let status = match parts.next() {
        Some(raw) => raw.parse()?,
        None => PresenceStatus::Online,
    };

    Ok((username.to_string(), status))
}

pub fn encode_status_datagram(username: &str, status: &str) -> String {
    format!("STATUS:{username}:{status}")
}

/// Encoding for the datagram transport; only status lines have a compact form.
pub fn datagram_for(message: &ServerMessage) -> Option<String> {
    match message {
        ServerMessage::Status(line) => Some(encode_status_datagram(&line.username, &line.text)),
        _ => None,
    }
}

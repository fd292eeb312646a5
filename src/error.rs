use thiserror::Error;

use crate::client::{ClientState, ConnId};

#[derive(Error, Debug)]
pub enum HubError {
    /// Transport read or write failure. Ends the session, never reaches peers.
    #[error("connection error: {0}")]
    Connection(String),
    /// A single frame could not be decoded. The frame is dropped.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("slow consumer {0}: outbound queue full")]
    SlowConsumer(ConnId),
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition { from: ClientState, to: ClientState },
    #[error("hub is shut down")]
    HubClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HubError {
    pub fn protocol(message: impl Into<String>) -> Self {
        HubError::Protocol(message.into())
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        HubError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn slow_consumer_names_the_connection() {
        let id = Uuid::nil();
        let text = HubError::SlowConsumer(id).to_string();
        assert_eq!(text, format!("slow consumer {id}: outbound queue full"));
    }
}

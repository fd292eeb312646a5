use std::fmt;
use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::messages::ServerMessage;

pub type ConnId = Uuid;

/// What travels through an outbound queue. Shared across a fan-out so a
/// broadcast is built once; each adapter encodes it for its own wire.
pub type Outbound = Arc<ServerMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WebSocket,
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::WebSocket => "ws",
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Sent,
    Full,
    Closed,
}

/// The hub's side of a client: identity plus the only sender of its
/// outbound queue. Not `Clone`: dropping it is what closes the queue.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ConnId,
    pub username: String,
    pub transport: Transport,
    tx: mpsc::Sender<Outbound>,
}

impl ClientHandle {
    pub fn new(username: impl Into<String>, transport: Transport, tx: mpsc::Sender<Outbound>) -> Self {
        ClientHandle {
            id: Uuid::new_v4(),
            username: username.into(),
            transport,
            tx,
        }
    }

    /// Creates a handle together with the receiving end of its queue.
    pub fn channel(
        username: impl Into<String>,
        transport: Transport,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientHandle::new(username, transport, tx), rx)
    }

    /// Non-blocking enqueue.
    pub fn try_send(&self, message: Outbound) -> Enqueue {
        match self.tx.try_send(message) {
            Ok(()) => Enqueue::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Per-connection lifecycle:
/// `Connecting -> Registered -> Active -> Unregistering -> Closed`.
///
/// Every path out of `Registered`/`Active` goes through `Unregistering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Registered,
    Active,
    Unregistering,
    Closed,
}

impl ClientState {
    pub fn can_advance_to(self, next: ClientState) -> bool {
        use ClientState::{Active, Closed, Connecting, Registered, Unregistering};
        matches!(
            (self, next),
            (Connecting, Registered)
                // handshake or registration failed before the hub knew us
                | (Connecting, Closed)
                | (Registered, Active)
                | (Registered | Active, Unregistering)
                | (Unregistering, Closed)
        )
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    id: ConnId,
    state: ClientState,
}

impl Lifecycle {
    pub fn new(id: ConnId) -> Self {
        Lifecycle {
            id,
            state: ClientState::Connecting,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn advance(&mut self, next: ClientState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_advance_to(next) {
            return Err(HubError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("client {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }
}

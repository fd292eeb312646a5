//! Connection adapters: one physical connection bridged to the hub.
//!
//! Each transport supplies a [`FrameReader`] and a [`FrameWriter`]. A
//! [`Session`] runs them as two tasks that only meet through the client's
//! outbound queue and a cancellation signal:
//!
//! ```text
//! reader task: frame -> decode -> hub.chat / hub.command
//! writer task: outbound queue -> encode -> wire, plus keepalive pings
//! ```
//!
//! Whichever side stops first, the client is unregistered exactly once from
//! the hub's point of view and the other side winds down.

pub mod tcp;
pub mod udp;
pub mod ws;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::client::{ClientHandle, ClientState, ConnId, Lifecycle, Outbound, Transport};
use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::messages::ServerMessage;
use crate::protocol::{ClientCommand, Inbound};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Control traffic (ping/pong). Counts as activity, carries nothing.
    Heartbeat,
}

#[async_trait]
pub trait FrameReader: Send {
    /// `Ok(None)` on an orderly close. A `Protocol` error drops one frame,
    /// any other error ends the session.
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, message: &ServerMessage) -> Result<()>;
    async fn ping(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub outbound_capacity: usize,
    pub ping_interval: Duration,
    /// Read deadline, reset by every inbound frame. `None` disables it.
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            idle_timeout: Some(Duration::from_secs(60)),
            write_timeout: Duration::from_secs(10),
        }
    }
}

pub type Decoder = fn(&str) -> Result<Inbound>;

/// One client connection after its handshake.
pub struct Session {
    pub hub: Hub,
    pub username: String,
    pub room: String,
    pub transport: Transport,
    pub decode: Decoder,
    pub settings: SessionSettings,
}

/// Unregisters on drop, so every way out of a session releases the
/// room membership, including cancellation of the session future.
struct Registration {
    hub: Hub,
    id: ConnId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

impl Session {
    pub async fn run<R, W>(self, reader: R, writer: W)
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        let (handle, rx) = ClientHandle::channel(
            self.username.clone(),
            self.transport,
            self.settings.outbound_capacity,
        );
        let id = handle.id;
        let mut lifecycle = Lifecycle::new(id);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Started first so the join notice and replay are drained as they arrive.
        let writer_task = spawn_writer(self.hub.clone(), id, writer, rx, &self.settings, cancel_tx);

        match self.hub.register(handle, Some(self.room.clone())).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!("registration of {} ({id}) refused", self.username);
                step(&mut lifecycle, ClientState::Closed);
                let _ = writer_task.await;
                return;
            }
        }
        step(&mut lifecycle, ClientState::Registered);
        let registration = Registration {
            hub: self.hub.clone(),
            id,
        };

        self.read_loop(id, &mut lifecycle, reader, cancel_rx).await;

        step(&mut lifecycle, ClientState::Unregistering);
        drop(registration);
        // The hub drops our queue on unregister; the writer drains it and closes.
        let _ = writer_task.await;
        step(&mut lifecycle, ClientState::Closed);
        info!(
            "{} client {} ({id}) closed",
            self.transport, self.username
        );
    }

    async fn read_loop<R: FrameReader>(
        &self,
        id: ConnId,
        lifecycle: &mut Lifecycle,
        mut reader: R,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    debug!("writer for {} stopped, ending read loop", self.username);
                    return;
                }
                frame = read_frame(&mut reader, self.settings.idle_timeout) => frame,
            };

            let text = match frame {
                Ok(Some(Frame::Text(text))) => text,
                Ok(Some(Frame::Heartbeat)) => continue,
                Ok(None) => {
                    debug!("{} closed the connection", self.username);
                    return;
                }
                Err(HubError::Protocol(reason)) => {
                    debug!("dropping frame from {}: {reason}", self.username);
                    continue;
                }
                Err(e) => {
                    debug!("read from {} failed: {e}", self.username);
                    return;
                }
            };
            step(lifecycle, ClientState::Active);

            let submitted = match (self.decode)(&text) {
                Ok(Inbound::Chat(text)) => self.hub.chat(id, text),
                Ok(Inbound::Command(ClientCommand::Quit)) => {
                    info!("{} quit", self.username);
                    return;
                }
                Ok(Inbound::Command(command)) => self.hub.command(id, command),
                Err(e) => {
                    debug!("ignoring input from {}: {e}", self.username);
                    continue;
                }
            };
            if submitted.is_err() {
                return;
            }
        }
    }
}

fn step(lifecycle: &mut Lifecycle, next: ClientState) {
    if let Err(e) = lifecycle.advance(next) {
        warn!("{e}");
    }
}

async fn read_frame<R: FrameReader>(
    reader: &mut R,
    idle_timeout: Option<Duration>,
) -> Result<Option<Frame>> {
    match idle_timeout {
        Some(limit) => timeout(limit, reader.next_frame())
            .await
            .map_err(|_| HubError::Connection("idle timeout".to_string()))?,
        None => reader.next_frame().await,
    }
}

async fn timed<F>(limit: Duration, write: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    timeout(limit, write)
        .await
        .map_err(|_| HubError::Connection("write timed out".to_string()))?
}

/// Drains `rx` into `writer` with a keepalive ping every `ping_interval`.
///
/// The queue closing means the hub let go of the client: a close frame is
/// sent. A failed write or ping unregisters the client instead. Either way
/// `cancel` fires on exit.
pub fn spawn_writer<W>(
    hub: Hub,
    id: ConnId,
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    settings: &SessionSettings,
    cancel: watch::Sender<bool>,
) -> JoinHandle<()>
where
    W: FrameWriter + 'static,
{
    let ping_interval = settings.ping_interval;
    let write_timeout = settings.write_timeout;

    tokio::spawn(async move {
        let mut keepalive = interval_at(Instant::now() + ping_interval, ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) = timed(write_timeout, writer.send(&message)).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
                _ = keepalive.tick() => {
                    if let Err(e) = timed(write_timeout, writer.ping()).await {
                        break Err(e);
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = timed(write_timeout, writer.close()).await {
                    debug!("close for {id} failed: {e}");
                }
            }
            Err(e) => {
                warn!("write to {id} failed, unregistering: {e}");
                hub.unregister(id);
            }
        }
        let _ = cancel.send(true);
    })
}

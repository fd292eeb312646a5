//! Status-only datagram transport.
//!
//! Every reporting address becomes a room-less presence watcher in the hub,
//! so status broadcasts reach it through the ordinary router. A watcher that
//! stops reporting for longer than the configured ttl is unregistered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::{spawn_writer, FrameWriter, SessionSettings};
use crate::client::{ClientHandle, ConnId, Transport};
use crate::error::Result;
use crate::hub::Hub;
use crate::messages::ServerMessage;
use crate::protocol;

const MAX_DATAGRAM: usize = 1024;

pub struct UdpWriter {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

#[async_trait]
impl FrameWriter for UdpWriter {
    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        if let Some(datagram) = protocol::datagram_for(message) {
            self.socket.send_to(datagram.as_bytes(), self.addr).await?;
        }
        Ok(())
    }

    // Datagram peers have no connection to keep alive.
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Watcher {
    id: ConnId,
    addr: SocketAddr,
    writer: JoinHandle<()>,
    last_seen: Instant,
}

impl Watcher {
    /// Still registered and reachable at `addr`.
    fn is_current(&self, addr: SocketAddr) -> bool {
        self.addr == addr && !self.writer.is_finished()
    }
}

/// Serves `STATUS:` datagrams until the task is aborted.
pub async fn listen(
    socket: UdpSocket,
    hub: Hub,
    settings: SessionSettings,
    watcher_ttl: Duration,
) {
    let socket = Arc::new(socket);
    let mut watchers: HashMap<String, Watcher> = HashMap::new();
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut sweep = interval_at(Instant::now() + watcher_ttl, watcher_ttl);

    loop {
        let (len, addr) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("udp receive failed: {e}");
                    continue;
                }
            },
            _ = sweep.tick() => {
                expire(&hub, &mut watchers, watcher_ttl);
                continue;
            }
        };
        let (username, status) = match protocol::decode_status_datagram(&buf[..len]) {
            Ok(report) => report,
            Err(e) => {
                debug!("ignoring datagram from {addr}: {e}");
                continue;
            }
        };

        if !watchers.get(&username).is_some_and(|w| w.is_current(addr)) {
            if let Some(old) = watchers.remove(&username) {
                debug!("{username} moved from {} to {addr}", old.addr);
                hub.unregister(old.id);
            }
            match watch_from(&hub, &socket, &username, addr, &settings).await {
                Some(watcher) => {
                    info!("udp client {username} watching from {addr}");
                    watchers.insert(username.clone(), watcher);
                }
                None => return,
            }
        }
        if let Some(watcher) = watchers.get_mut(&username) {
            watcher.last_seen = Instant::now();
        }

        if hub.report_status(&username, status).is_err() {
            return;
        }
    }
}

/// Unregisters watchers silent for at least `ttl`.
fn expire(hub: &Hub, watchers: &mut HashMap<String, Watcher>, ttl: Duration) {
    watchers.retain(|username, watcher| {
        if watcher.last_seen.elapsed() < ttl {
            return true;
        }
        debug!("udp client {username} at {} went quiet", watcher.addr);
        hub.unregister(watcher.id);
        false
    });
}

/// `None` once the hub is gone.
async fn watch_from(
    hub: &Hub,
    socket: &Arc<UdpSocket>,
    username: &str,
    addr: SocketAddr,
    settings: &SessionSettings,
) -> Option<Watcher> {
    let (handle, rx) = ClientHandle::channel(username, Transport::Udp, settings.outbound_capacity);
    let id = handle.id;
    // Nothing reads datagram sessions, so the signal has no listener.
    let (cancel, _) = watch::channel(false);
    let writer = UdpWriter {
        socket: Arc::clone(socket),
        addr,
    };
    let writer = spawn_writer(hub.clone(), id, writer, rx, settings, cancel);

    match hub.register(handle, None).await {
        Ok(_) => Some(Watcher {
            id,
            addr,
            writer,
            last_seen: Instant::now(),
        }),
        Err(e) => {
            debug!("cannot register {username}: {e}");
            None
        }
    }
}

//! Multi-transport chat hub.
//!
//! A single control loop ([`hub::Hub`]) owns rooms, presence and history.
//! WebSocket, TCP line and UDP status clients reach it through
//! [`adapter`] sessions; [`server`] exposes the WebSocket upgrade and a small
//! admin API over warp.

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod hub;
pub mod messages;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod router;
pub mod server;

pub use client::{ClientHandle, ConnId, Transport};
pub use config::Config;
pub use error::{HubError, Result};
pub use hub::{Hub, HubConfig};
pub use messages::{Message, PresenceStatus, ServerMessage, Target};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::info;
use warp::ws::{Message as WsMessage, WebSocket};

use super::{Frame, FrameReader, FrameWriter, Session, SessionSettings};
use crate::client::Transport;
use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::messages::ServerMessage;
use crate::protocol;

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

pub struct WsWriter {
    sink: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(result) = self.stream.next().await else {
            return Ok(None);
        };
        let msg = result.map_err(HubError::connection)?;

        if msg.is_close() {
            return Ok(None);
        }
        if msg.is_ping() || msg.is_pong() {
            return Ok(Some(Frame::Heartbeat));
        }
        match msg.to_str() {
            Ok(text) => Ok(Some(Frame::Text(text.to_string()))),
            Err(()) => Err(HubError::protocol("expected a text frame")),
        }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.sink
            .send(WsMessage::text(text))
            .await
            .map_err(HubError::connection)
    }

    async fn ping(&mut self) -> Result<()> {
        self.sink
            .send(WsMessage::ping(Vec::new()))
            .await
            .map_err(HubError::connection)
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .send(WsMessage::close())
            .await
            .map_err(HubError::connection)
    }
}

/// Runs an upgraded socket until either side hangs up.
pub async fn serve(
    socket: WebSocket,
    hub: Hub,
    username: String,
    room: String,
    settings: SessionSettings,
) {
    info!("websocket client {username} connecting to {room}");
    let (sink, stream) = socket.split();

    Session {
        hub,
        username,
        room,
        transport: Transport::WebSocket,
        decode: protocol::decode_json,
        settings,
    }
    .run(WsReader { stream }, WsWriter { sink })
    .await;
}

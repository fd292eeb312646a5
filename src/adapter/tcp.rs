use std::net::SocketAddr;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use super::{Frame, FrameReader, FrameWriter, Session, SessionSettings};
use crate::client::Transport;
use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::messages::ServerMessage;
use crate::protocol;

pub const USERNAME_PROMPT: &str = "Enter username: ";
pub const ROOM_PROMPT: &str = "Enter room: ";
/// Longest accepted line, terminator excluded.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

pub struct TcpReader {
    reader: BufReader<OwnedReadHalf>,
}

impl TcpReader {
    fn new(half: OwnedReadHalf) -> Self {
        TcpReader {
            reader: BufReader::new(half),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Lines that are too long or not UTF-8 are consumed whole and reported
    /// as protocol errors, leaving the stream positioned at the next line.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() > MAX_LINE_BYTES {
            self.skip_rest_of_line().await?;
            return Err(HubError::protocol(format!(
                "line longer than {MAX_LINE_BYTES} bytes"
            )));
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| HubError::protocol("line is not valid utf-8"))
    }

    async fn skip_rest_of_line(&mut self) -> Result<()> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.reader.consume(end + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

pub struct TcpWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl FrameReader for TcpReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.read_line().await?.map(Frame::Text))
    }
}

#[async_trait]
impl FrameWriter for TcpWriter {
    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.half.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.send(&ServerMessage::Ping).await
    }

    async fn close(&mut self) -> Result<()> {
        self.half.shutdown().await?;
        Ok(())
    }
}

/// Accepts line clients until the task is aborted.
pub async fn listen(listener: TcpListener, hub: Hub, default_room: String, settings: SessionSettings) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    hub.clone(),
                    default_room.clone(),
                    settings.clone(),
                ));
            }
            Err(e) => error!("tcp accept failed: {e}"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Hub,
    default_room: String,
    settings: SessionSettings,
) {
    debug!("tcp connection from {peer}");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = TcpReader::new(read_half);

    let (username, room) = match handshake(&mut reader, &mut write_half, &default_room).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            debug!("{peer} left during handshake");
            return;
        }
        Err(e) => {
            debug!("handshake with {peer} failed: {e}");
            return;
        }
    };
    info!("tcp client {username} from {peer} joining {room}");

    Session {
        hub,
        username,
        room,
        transport: Transport::Tcp,
        decode: protocol::decode_line,
        settings,
    }
    .run(reader, TcpWriter { half: write_half })
    .await;
}

/// `None` when the peer hangs up or gives an empty username.
async fn handshake(
    reader: &mut TcpReader,
    writer: &mut OwnedWriteHalf,
    default_room: &str,
) -> Result<Option<(String, String)>> {
    let Some(username) = prompt(reader, writer, USERNAME_PROMPT).await? else {
        return Ok(None);
    };
    if username.is_empty() {
        return Ok(None);
    }
    let Some(room) = prompt(reader, writer, ROOM_PROMPT).await? else {
        return Ok(None);
    };
    let room = if room.is_empty() {
        default_room.to_string()
    } else {
        room
    };
    Ok(Some((username, room)))
}

async fn prompt(
    reader: &mut TcpReader,
    writer: &mut OwnedWriteHalf,
    text: &str,
) -> Result<Option<String>> {
    writer.write_all(text.as_bytes()).await?;
    let answer = reader
        .read_line()
        .await
        .map_err(|e| HubError::Connection(format!("reading handshake: {e}")))?;
    Ok(answer.map(|line| line.trim().to_string()))
}

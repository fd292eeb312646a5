use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use chat_hub::adapter::tcp::{self, MAX_LINE_BYTES, ROOM_PROMPT, USERNAME_PROMPT};
use chat_hub::adapter::SessionSettings;
use chat_hub::{Hub, HubConfig};

struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    async fn connect(addr: std::net::SocketAddr, username: &str, room: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = LineClient {
            reader: BufReader::new(read_half),
            writer,
        };
        client.expect_prompt(USERNAME_PROMPT).await;
        client.send(username).await;
        client.expect_prompt(ROOM_PROMPT).await;
        client.send(room).await;
        client
    }

    async fn expect_prompt(&mut self, prompt: &str) {
        let mut buf = vec![0u8; prompt.len()];
        timeout(Duration::from_secs(2), self.reader.read_exact(&mut buf))
            .await
            .expect("prompt in time")
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), prompt);
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("line in time")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

async fn start() -> (Hub, std::net::SocketAddr) {
    let (hub, _task) = Hub::start(HubConfig::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = SessionSettings {
        idle_timeout: None,
        ..SessionSettings::default()
    };
    tokio::spawn(tcp::listen(listener, hub.clone(), "general".into(), settings));
    (hub, addr)
}

#[tokio::test]
async fn two_clients_chat_in_a_room() {
    let (hub, addr) = start().await;

    let mut alice = LineClient::connect(addr, "alice", "general").await;
    assert_eq!(alice.recv().await["text"], "alice joined the room");
    assert_eq!(alice.recv().await["text"], "Users online: 1");

    let mut bob = LineClient::connect(addr, "bob", "").await;
    assert_eq!(bob.recv().await["text"], "bob joined the room");
    assert_eq!(bob.recv().await["text"], "Users online: 2");
    assert_eq!(alice.recv().await["text"], "bob joined the room");
    assert_eq!(alice.recv().await["text"], "Users online: 2");

    alice.send("hello").await;
    for client in [&mut alice, &mut bob] {
        let chat = client.recv().await;
        assert_eq!(chat["type"], "chat");
        assert_eq!(chat["username"], "alice");
        assert_eq!(chat["room"], "general");
        assert_eq!(chat["text"], "hello");
    }

    bob.send(r#"{"text":"/users"}"#).await;
    let users = bob.recv().await;
    assert_eq!(users["type"], "user_list");
    assert_eq!(users["user_count"], 2);

    bob.send("/quit").await;
    assert_eq!(alice.recv().await["text"], "bob left the room");
    assert_eq!(alice.recv().await["text"], "Users online: 1");
    assert_eq!(hub.stats().await.unwrap().total_users, 1);
}

async fn joined_alone(addr: std::net::SocketAddr, username: &str) -> LineClient {
    let mut client = LineClient::connect(addr, username, "general").await;
    assert_eq!(client.recv().await["text"], format!("{username} joined the room"));
    assert_eq!(client.recv().await["text"], "Users online: 1");
    client
}

#[tokio::test]
async fn invalid_utf8_line_is_skipped() {
    let (hub, addr) = start().await;
    let mut alice = joined_alone(addr, "alice").await;

    alice.send_raw(b"\xff\xfe bad bytes\n").await;
    alice.send("hello").await;

    let chat = alice.recv().await;
    assert_eq!(chat["type"], "chat");
    assert_eq!(chat["text"], "hello");
    assert_eq!(hub.stats().await.unwrap().total_users, 1);
}

#[tokio::test]
async fn oversized_line_is_skipped() {
    let (hub, addr) = start().await;
    let mut alice = joined_alone(addr, "alice").await;

    let mut long = vec![b'x'; MAX_LINE_BYTES * 3];
    long.push(b'\n');
    alice.send_raw(&long).await;
    alice.send("still here").await;

    let chat = alice.recv().await;
    assert_eq!(chat["type"], "chat");
    assert_eq!(chat["text"], "still here");
    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.message_history, 1);
}

#[tokio::test]
async fn empty_username_closes_connection() {
    let (hub, addr) = start().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut prompt = vec![0u8; USERNAME_PROMPT.len()];
    reader.read_exact(&mut prompt).await.unwrap();
    writer.write_all(b"\n").await.unwrap();

    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(2), reader.read_to_end(&mut rest))
        .await
        .expect("server hangs up")
        .unwrap();
    assert_eq!(read, 0);
    assert_eq!(hub.stats().await.unwrap().total_users, 0);
}

#[tokio::test]
async fn dropped_connection_leaves_room() {
    let (hub, addr) = start().await;

    let mut alice = LineClient::connect(addr, "alice", "lobby").await;
    alice.recv().await;
    drop(alice);

    for _ in 0..100 {
        if hub.stats().await.unwrap().total_rooms == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room was never released");
}

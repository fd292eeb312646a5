//! Interactive WebSocket client: `hub_client <username> <room> [url]`.

use futures_util::{SinkExt, StreamExt};
use log::debug;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use chat_hub::ServerMessage;

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";

fn render(message: &ServerMessage) -> Option<String> {
    let line = match message {
        ServerMessage::Chat(line) => format!("[{}] {}: {}", line.time, line.username, line.text),
        ServerMessage::System(line) => format!("*** {} ***", line.text),
        ServerMessage::Status(line) => format!("[{}] {} is {}", line.time, line.username, line.text),
        ServerMessage::Notification(n) => {
            let level = format!("{:?}", n.level).to_uppercase();
            if n.title.is_empty() {
                format!("[{level}] {}", n.message)
            } else {
                format!("[{level}] {}: {}", n.title, n.message)
            }
        }
        ServerMessage::UserList {
            room,
            user_count,
            users,
        } => {
            let names: Vec<String> = users
                .iter()
                .map(|u| format!("{} ({})", u.username, u.status))
                .collect();
            format!("{user_count} in {room}: {}", names.join(", "))
        }
        ServerMessage::Stats {
            total_users,
            total_rooms,
            room_details,
        } => {
            let rooms: Vec<String> = room_details
                .iter()
                .map(|(room, count)| format!("{room}={count}"))
                .collect();
            format!("{total_users} users in {total_rooms} rooms [{}]", rooms.join(", "))
        }
        ServerMessage::Rooms { total_rooms, rooms } => {
            format!("{total_rooms} rooms: {}", rooms.join(", "))
        }
        ServerMessage::History {
            room,
            count,
            messages,
        } => {
            let mut out = format!("last {count} in {room}:");
            for line in messages {
                out.push_str(&format!("\n  [{}] {}: {}", line.time, line.username, line.text));
            }
            out
        }
        ServerMessage::Presence {
            username, status, ..
        } => format!("{username} is {status}"),
        ServerMessage::Ping => return None,
    };
    Some(line)
}

fn valid_component(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: hub_client <username> <room> [url]");
        std::process::exit(1);
    }
    let (username, room) = (&args[1], &args[2]);
    if !valid_component(username) || !valid_component(room) {
        eprintln!("username and room may only contain letters, digits, '-', '_' and '.'");
        std::process::exit(1);
    }
    let base = args.get(3).map_or(DEFAULT_URL, String::as_str);
    let url = format!("{base}?username={username}&room={room}");

    let (socket, _) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            eprintln!("cannot connect to {url}: {e}");
            std::process::exit(1);
        }
    };
    println!("Connected to {room} as {username}. Type /quit to leave.");
    let (mut write, mut read) = socket.split();

    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let frame = json!({ "text": line }).to_string();
            if write.send(Message::text(frame)).await.is_err() {
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                Ok(message) => {
                    if let Some(line) = render(&message) {
                        println!("{line}");
                    }
                }
                Err(e) => {
                    debug!("unrecognised frame: {e}");
                    println!("{}", text.as_str());
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("connection error: {e}");
                break;
            }
        }
    }

    input.abort();
    println!("Disconnected.");
}

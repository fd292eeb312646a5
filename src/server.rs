//! HTTP surface: WebSocket upgrade plus the small admin API.

use std::convert::Infallible;
use std::future::Future;

use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::adapter::{ws, SessionSettings};
use crate::config::Config;
use crate::hub::Hub;
use crate::messages::{Message, Notification, NotificationLevel, ServerMessage, Target};
use crate::presence::UNKNOWN_STATUS;

#[derive(Debug, Deserialize)]
struct JoinParams {
    username: Option<String>,
    room: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "type")]
    level: Option<NotificationLevel>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    target: String,
}

fn with_hub(hub: Hub) -> impl Filter<Extract = (Hub,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

fn error_reply(status: StatusCode, message: &str) -> WithStatus<Json> {
    reply::with_status(reply::json(&json!({ "error": message })), status)
}

pub fn routes(
    hub: Hub,
    settings: SessionSettings,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<JoinParams>())
        .and(with_hub(hub.clone()))
        .map(move |upgrade: warp::ws::Ws, params: JoinParams, hub: Hub| {
            let username = params.username.map(|u| u.trim().to_string()).unwrap_or_default();
            let room = params.room.map(|r| r.trim().to_string()).unwrap_or_default();
            if username.is_empty() || room.is_empty() {
                return error_reply(StatusCode::BAD_REQUEST, "username and room are required")
                    .into_response();
            }
            let settings = settings.clone();
            upgrade
                .on_upgrade(move |socket| ws::serve(socket, hub, username, room, settings))
                .into_response()
        });

    let notify = warp::path!("api" / "notify")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_hub(hub.clone()))
        .and_then(notify);

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_hub(hub.clone()))
        .and_then(stats);

    let presence = warp::path!("api" / "presence" / String)
        .and(warp::get())
        .and(with_hub(hub.clone()))
        .and_then(presence);

    let health = warp::path("health")
        .and(warp::path::end())
        .map(|| reply::json(&json!({ "status": "ok" })));

    ws_route
        .or(notify)
        .or(stats)
        .or(presence)
        .or(health)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST"])
                .allow_header("content-type"),
        )
}

async fn notify(request: NotifyRequest, hub: Hub) -> Result<WithStatus<Json>, Infallible> {
    if request.message.trim().is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "message is required"));
    }
    if request.target.trim().is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "target is required"));
    }
    let target: Target = match request.target.parse() {
        Ok(target) => target,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string())),
    };

    let timestamp = Utc::now();
    let id = request.id.filter(|id| !id.is_empty()).unwrap_or_else(|| {
        format!("notif-{}", timestamp.timestamp_nanos_opt().unwrap_or_default())
    });
    let notification = Notification {
        id: id.clone(),
        level: request.level.unwrap_or_default(),
        title: request.title,
        message: request.message,
        timestamp,
        target,
    };
    info!("notification {id} -> {}", notification.target);

    match hub.publish_acked(Message::notification(notification)).await {
        Ok(delivered) => Ok(reply::with_status(
            reply::json(&json!({ "status": "sent", "id": id, "delivered": delivered })),
            StatusCode::OK,
        )),
        Err(e) => {
            warn!("notification {id} not routed: {e}");
            Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()))
        }
    }
}

async fn stats(hub: Hub) -> Result<WithStatus<Json>, Infallible> {
    Ok(match hub.stats().await {
        Ok(stats) => reply::with_status(reply::json(&stats), StatusCode::OK),
        Err(e) => error_reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
    })
}

async fn presence(username: String, hub: Hub) -> Result<WithStatus<Json>, Infallible> {
    let record = match hub.presence(&username).await {
        Ok(record) => record,
        Err(e) => return Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())),
    };
    let body = match record {
        Some(record) => ServerMessage::Presence {
            updated_at: Some(record.updated_clock()),
            status: record.status.to_string(),
            username: record.username,
        },
        None => ServerMessage::Presence {
            username,
            status: UNKNOWN_STATUS.to_string(),
            updated_at: None,
        },
    };
    Ok(reply::with_status(reply::json(&body), StatusCode::OK))
}

/// Serves HTTP (or HTTPS when both TLS files exist) until `shutdown` resolves.
pub async fn run<S>(hub: Hub, config: &Config, shutdown: S)
where
    S: Future<Output = ()> + Send + 'static,
{
    let routes = routes(hub, config.ws_session());

    if let Some((cert, key)) = config.tls_paths() {
        if cert.exists() && key.exists() {
            info!("Starting secure server (HTTPS/WSS) on {}", config.http_addr);
            let (_, server) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(config.http_addr, shutdown);
            server.await;
            return;
        }
        warn!("TLS files not found, falling back to HTTP/WS");
    }

    match warp::serve(routes).try_bind_with_graceful_shutdown(config.http_addr, shutdown) {
        Ok((addr, server)) => {
            info!("Starting server (HTTP/WS) on {addr}");
            server.await;
        }
        Err(e) => warn!("cannot bind {}: {e}", config.http_addr),
    }
}

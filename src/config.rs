use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::adapter::SessionSettings;
use crate::hub::HubConfig;

const ENV_PREFIX: &str = "CHAT_HUB_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("{key} must be greater than zero")]
    Zero { key: String },
}

/// Runtime settings, read from `CHAT_HUB_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub outbound_capacity: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    /// How long a datagram reporter stays watching after its last report.
    pub udp_watcher_ttl: Duration,
    pub default_room: String,
    pub history_replay: usize,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            udp_watcher_ttl: Duration::from_secs(300),
            default_room: "general".to_string(),
            history_replay: 20,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let config = Config {
            http_addr: parse_or(&get, "HTTP_ADDR", defaults.http_addr)?,
            tcp_addr: parse_or(&get, "TCP_ADDR", defaults.tcp_addr)?,
            udp_addr: parse_or(&get, "UDP_ADDR", defaults.udp_addr)?,
            outbound_capacity: positive(
                "OUTBOUND_CAPACITY",
                parse_or(&get, "OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
            )?,
            ping_interval: secs_or(&get, "PING_INTERVAL_SECS", defaults.ping_interval)?,
            idle_timeout: secs_or(&get, "IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            write_timeout: secs_or(&get, "WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            udp_watcher_ttl: secs_or(&get, "UDP_WATCHER_TTL_SECS", defaults.udp_watcher_ttl)?,
            default_room: get("DEFAULT_ROOM")
                .map(|room| room.trim().to_string())
                .filter(|room| !room.is_empty())
                .unwrap_or(defaults.default_room),
            history_replay: parse_or(&get, "HISTORY_REPLAY", defaults.history_replay)?,
            tls_cert: get("TLS_CERT").map(PathBuf::from),
            tls_key: get("TLS_KEY").map(PathBuf::from),
        };

        Ok(config)
    }

    /// Both TLS paths, if both are configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            history_replay: self.history_replay,
        }
    }

    /// Settings for WebSocket sessions: read deadline enforced, pings expected back.
    pub fn ws_session(&self) -> SessionSettings {
        SessionSettings {
            outbound_capacity: self.outbound_capacity,
            ping_interval: self.ping_interval,
            idle_timeout: Some(self.idle_timeout),
            write_timeout: self.write_timeout,
        }
    }

    /// Settings for TCP line sessions. Plain line clients never answer pings,
    /// so dead peers are found by failed writes instead of a read deadline.
    pub fn tcp_session(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: None,
            ..self.ws_session()
        }
    }
}

fn parse_or<T, F>(get: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{name}"),
            value: raw,
        }),
    }
}

fn secs_or<F>(get: &F, name: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = positive(name, parse_or(get, name, default.as_secs())?)?;
    Ok(Duration::from_secs(secs))
}

fn positive<T: Default + PartialOrd>(name: &str, value: T) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Zero {
            key: format!("{ENV_PREFIX}{name}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.tcp_addr.port(), 9000);
        assert_eq!(config.udp_addr.port(), 9001);
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.ping_interval, Duration::from_secs(54));
        assert_eq!(config.default_room, "general");
        assert_eq!(config.udp_watcher_ttl, Duration::from_secs(300));
        assert_eq!(config.hub().history_replay, 20);
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("CHAT_HUB_TCP_ADDR", "127.0.0.1:7000"),
            ("CHAT_HUB_OUTBOUND_CAPACITY", "8"),
            ("CHAT_HUB_IDLE_TIMEOUT_SECS", "5"),
            ("CHAT_HUB_UDP_WATCHER_TTL_SECS", "30"),
            ("CHAT_HUB_DEFAULT_ROOM", " lobby "),
            ("CHAT_HUB_TLS_CERT", "cert.pem"),
            ("CHAT_HUB_TLS_KEY", "key.pem"),
        ]))
        .unwrap();

        assert_eq!(config.tcp_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.outbound_capacity, 8);
        assert_eq!(config.ws_session().idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.tcp_session().idle_timeout, None);
        assert_eq!(config.udp_watcher_ttl, Duration::from_secs(30));
        assert_eq!(config.default_room, "lobby");
        assert!(config.tls_paths().is_some());
    }

    #[test]
    fn rejects_garbage_and_zero() {
        let err = Config::from_lookup(lookup(&[("CHAT_HUB_HTTP_ADDR", "nope")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err =
            Config::from_lookup(lookup(&[("CHAT_HUB_OUTBOUND_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));

        let err =
            Config::from_lookup(lookup(&[("CHAT_HUB_UDP_WATCHER_TTL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }
}

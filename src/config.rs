//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Semantic checks (paths, broker names,
//! pool sizing) happen in [`crate::hub::Hub::new`], so a hub built from any
//! source is validated the same way.

use std::net::SocketAddr;
use std::time::Duration;

use crate::access::split_list;

/// Top-level process configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// WebSocket hub settings.
    pub ws: WsSettings,

    /// Access validator settings.
    pub access: AccessSettings,

    /// Buffer size of each in-process memory broker.
    pub memory_broker_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

/// Settings consumed by the hub itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsSettings {
    /// Upgrade endpoint path (e.g. `/ws`).
    pub path: String,

    /// Names of the brokers the hub reads from and publishes to.
    pub broker_names: Vec<String>,

    /// Number of fan-out workers.
    pub workers: usize,

    /// Capacity of the bounded fan-out queue.
    pub queue_capacity: usize,

    /// Upper bound on the WebSocket upgrade handshake.
    pub handshake_timeout: Duration,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            broker_names: vec!["memory".to_string()],
            workers: default_workers(),
            queue_capacity: 1024,
            handshake_timeout: Duration::from_secs(60),
        }
    }
}

/// Settings for [`crate::access::StaticValidator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSettings {
    /// Shared token clients must present; `None` disables the check.
    pub token: Option<String>,

    /// Topics clients may join; `None` permits every topic.
    pub allow_topics: Option<Vec<String>>,

    /// Topics no client may join.
    pub deny_topics: Vec<String>,
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Falls back to sensible defaults when a key is missing or invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is present but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_source<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()?;

        let defaults = WsSettings::default();
        let ws = WsSettings {
            path: lookup("WS_PATH").unwrap_or(defaults.path),
            broker_names: lookup("WS_BROKERS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.broker_names),
            workers: parse_key(&lookup, "WS_WORKERS", defaults.workers),
            queue_capacity: parse_key(&lookup, "WS_QUEUE_CAPACITY", defaults.queue_capacity),
            handshake_timeout: Duration::from_secs(parse_key(
                &lookup,
                "WS_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout.as_secs(),
            )),
        };

        let access = AccessSettings {
            token: lookup("ACCESS_TOKEN").filter(|t| !t.is_empty()),
            allow_topics: lookup("ACCESS_ALLOW_TOPICS")
                .map(|raw| split_list(&raw))
                .filter(|topics| !topics.iter().any(|t| t == "*")),
            deny_topics: lookup("ACCESS_DENY_TOPICS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            ws,
            access,
            memory_broker_capacity: parse_key(&lookup, "MEMORY_BROKER_CAPACITY", 1024),
            log_format,
        })
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Parses a key as `T`, returning `default` on missing or invalid values.
fn parse_key<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

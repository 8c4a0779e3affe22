//! Hub configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! bind = "0.0.0.0:8765"
//! handshake_timeout_ms = 5000
//! max_invalid_frames = 5
//!
//! [heartbeat]
//! interval_ms = 15000
//! timeout_ms = 45000
//!
//! [lobby]
//! outbound_queue_capacity = 64
//! store_timeout_ms = 5000
//!
//! [store]
//! base_url = "http://localhost:8000"
//!
//! [auth]
//! base_url = "http://localhost:8000"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use lobbysync_lobby::LobbyConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "LOBBYSYNC_CONFIG";
/// Environment variable overriding [`HubConfig::bind`].
pub const BIND_ENV: &str = "LOBBYSYNC_BIND";
/// Environment variable overriding [`StoreConfig::base_url`].
pub const STORE_URL_ENV: &str = "LOBBYSYNC_STORE_URL";

/// Top-level hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// How long a new connection may take to send its handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Consecutive invalid frames tolerated before the connection is
    /// closed for policy violation.
    #[serde(default = "default_max_invalid_frames")]
    pub max_invalid_frames: u32,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub lobby: LobbyConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

/// Liveness probing of connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds. Also the idle threshold.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// A client silent for this long (no data, no pong) is dropped.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where lobby records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the lobby REST service. When unset the hub runs
    /// against an in-memory store seeded from `lobbies`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token the hub presents to the lobby service.
    #[serde(default)]
    pub service_token: Option<String>,

    /// Lobbies to seed the in-memory store with.
    #[serde(default)]
    pub lobbies: Vec<SeedLobby>,
}

/// One lobby for the in-memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedLobby {
    pub id: String,
    pub creator: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// How bearer tokens are checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the auth REST service. When unset, `tokens` is used.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Static token → username table.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

// Default value functions
fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_max_invalid_frames() -> u32 {
    5
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    45_000
}

impl HubConfig {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies `LOBBYSYNC_BIND` and `LOBBYSYNC_STORE_URL` from `lookup`.
    ///
    /// Takes a lookup function instead of reading the process
    /// environment so it stays testable.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind = bind;
        }
        if let Some(url) = lookup(STORE_URL_ENV) {
            self.store.base_url = Some(url);
        }
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl HeartbeatConfig {
    /// Builds a heartbeat config from durations.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_invalid_frames: default_max_invalid_frames(),
            heartbeat: HeartbeatConfig::default(),
            lobby: LobbyConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

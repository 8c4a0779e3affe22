//! Lobby layer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by every lobby actor and coordinator.
///
/// Deserializable so it can sit under `[lobby]` in the hub's config
/// file; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// Capacity of each lobby actor's command channel.
    #[serde(default = "default_command_channel_size")]
    pub command_channel_size: usize,

    /// Capacity of each session's outbound queue. A session that falls
    /// this far behind is shed.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Upper bound for every lobby store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_command_channel_size() -> usize {
    64
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

impl LobbyConfig {
    /// Sets the command channel capacity.
    pub fn command_channel_size(mut self, size: usize) -> Self {
        self.command_channel_size = size;
        self
    }

    /// Sets the per-session outbound queue capacity.
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Sets the store call timeout.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The store call timeout as a [`Duration`].
    pub fn store_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            command_channel_size: default_command_channel_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

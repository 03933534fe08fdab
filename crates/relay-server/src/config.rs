//! Server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections; upgrades beyond this are
    /// refused with 503.
    pub max_connections: usize,
    /// Receive timeout in seconds for the per-connection loop.
    pub receive_timeout_secs: u64,
    /// Interval between server heartbeat passes in seconds.
    pub heartbeat_interval_secs: u64,
    /// Idle cutoff in seconds; connections quiet for longer are evicted.
    pub idle_cutoff_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Accept connections that present no token.
    pub allow_anonymous: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            receive_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            idle_cutoff_secs: 300,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            allow_anonymous: false,
        }
    }
}

impl ServerConfig {
    /// Receive timeout as a `Duration`.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Idle cutoff as a `Duration`.
    pub fn idle_cutoff(&self) -> Duration {
        Duration::from_secs(self.idle_cutoff_secs)
    }
}

/// Configuration data structures for the bridge client
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bridge server configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL the `/bridge/...` endpoints are appended to
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8080/api".to_string(),
        }
    }
}

/// Transport connection settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound for a single connection attempt, in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Connection configuration
    pub connection: ConnectionConfig,
}

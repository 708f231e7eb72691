//! # Configuration Utilities
//!
//! The server reads an optional TOML file. Every key has a default, so an
//! empty file (or no file at all) yields a working local setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Environment variable holding a comma-separated origin allow-list.
pub const ORIGINS_ENV_VAR: &str = "WHEREAMI_ORIGINS";

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path))?;
    let config: T =
        toml::from_str(&content).with_context(|| format!("failed to parse config file {}", path))?;
    Ok(config)
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub catalogue: CatalogueConfig,
    pub socket: SocketConfig,
    pub rounds: RoundConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address to bind (e.g., "0.0.0.0:8080")
    pub address: String,
    /// Directory holding `index.html`, `games.html` and client scripts
    pub public_dir: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            public_dir: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    /// Path of the `locations.json` file, rewritten at every startup
    pub path: String,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            path: "locations.json".to_string(),
        }
    }
}

/// WebSocket handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Route the socket is served on
    pub path: String,
    /// Sub-protocol token clients must offer
    pub protocol: String,
    /// Allowed `Origin` values. `None` accepts every origin.
    pub origins: Option<Vec<String>>,
    /// Outbound messages buffered per connection before it is dropped
    pub send_queue: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: "/socket".to_string(),
            protocol: "whoami".to_string(),
            origins: None,
            send_queue: 32,
        }
    }
}

/// Round countdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Delay between the first request and the round start
    pub countdown_ms: i64,
    /// How long late joiners share an existing countdown
    pub grace_ms: i64,
    /// How long an entry is kept before it is purged
    pub retention_ms: i64,
    /// How often expired entries are swept
    pub sweep_interval_secs: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_ms: 10_000,
            grace_ms: 15_000,
            retention_ms: 60_000,
            sweep_interval_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        load_config(path)
    }

    /// Replace the origin allow-list with the value of `$WHEREAMI_ORIGINS`, if set.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ORIGINS_ENV_VAR) {
            self.socket.origins = Some(parse_origins(&value));
        }
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

//! Configuration for both bridge endpoints
//!
//! Both structs are plain serde types with defaults for every field, so a
//! partial JSON file only overrides what it names.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default port the bridge server listens on
pub const DEFAULT_BRIDGE_PORT: u16 = 25577;

/// Default RCON port of the game server
pub const DEFAULT_RCON_PORT: u16 = 25575;

/// Settings for the process running next to the game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind the bridge listener to
    pub listen_host: String,
    /// Port the bridge listener binds to
    pub listen_port: u16,
    /// RCON target host
    pub rcon_host: String,
    /// RCON target port
    pub rcon_port: u16,
    /// Pause between RCON connection attempts
    pub rcon_retry_interval_ms: u64,
    /// Bound on waiting for the RCON auth reply
    pub auth_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            listen_port: DEFAULT_BRIDGE_PORT,
            rcon_host: "127.0.0.1".into(),
            rcon_port: DEFAULT_RCON_PORT,
            rcon_retry_interval_ms: 5_000,
            auth_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn rcon_addr(&self) -> String {
        format!("{}:{}", self.rcon_host, self.rcon_port)
    }

    pub fn rcon_retry_interval(&self) -> Duration {
        Duration::from_millis(self.rcon_retry_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

/// Settings for the remote operator's console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bridge server host
    pub server_host: String,
    /// Bridge server port
    pub server_port: u16,
    /// RCON password forwarded to the bridge server on every connect
    pub rcon_password: String,
    /// Pause between bridge reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Interval between keepalive pings
    pub heartbeat_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".into(),
            server_port: DEFAULT_BRIDGE_PORT,
            rcon_password: String::new(),
            reconnect_delay_ms: 5_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn has_password(&self) -> bool {
        !self.rcon_password.is_empty()
    }
}

/// Load a config file, writing the defaults out if it does not exist yet
pub fn load_or_default<T>(path: &Path) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    if !path.exists() {
        let config = T::default();
        if let Err(e) = save(path, &config) {
            warn!("Could not write default config to {:?}: {}", path, e);
        } else {
            info!("Generated default config at {:?}", path);
        }
        return Ok(config);
    }

    let data = std::fs::read(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {:?}: {}", path, e)))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write a config file as pretty JSON, creating parent directories
pub fn save<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create {:?}: {}", parent, e)))?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    std::fs::write(path, json)
        .map_err(|e| BridgeError::Config(format!("failed to write {:?}: {}", path, e)))
}

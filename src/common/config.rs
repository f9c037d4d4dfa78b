//! # Configuration Utilities
//!
//! Configuration structures shared by the peer binaries, loaded from TOML and
//! then overridden by command-line flags.
//!
//! ## Example TOML
//!
//! ```toml
//! [peer]
//! host = "localhost"
//! port = 40017
//! type = "fortune_jdoe"
//! directory = "127.0.0.1:40000"
//!
//! [database]
//! file = "dbs/fortune.db"
//! ```

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use super::messages::Address;

/// Placeholder type that must be replaced before a peer may start.
pub const PLACEHOLDER_TYPE: &str = "object";

/// Default location of the directory service.
pub const DEFAULT_DIRECTORY: &str = "127.0.0.1:40000";

/// Range random listening ports are drawn from.
pub const RANDOM_PORTS: std::ops::RangeInclusive<u16> = 40001..=50000;

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
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Settings every peer needs: where to listen, what type it is, where the
/// directory lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Host name or IP to listen on; resolved to an external interface at start
    #[serde(default = "default_host")]
    pub host: String,
    /// Listening port; `None` picks a random one in [`RANDOM_PORTS`], `Some(0)` lets the OS choose
    #[serde(default)]
    pub port: Option<u16>,
    /// Peer type, shared by all interchangeable peers
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    /// Address of the directory service
    #[serde(default = "default_directory")]
    pub directory: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database")]
    pub file: PathBuf,
}

/// Configuration of a fortune server peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Configuration of a console-driven peer (`mutex_peer`, `chat_peer`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolePeerConfig {
    #[serde(default)]
    pub peer: PeerConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            kind: default_type(),
            directory: default_directory(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: default_database(),
        }
    }
}

impl PeerConfig {
    /// The address to bind, drawing a random port when none was configured.
    pub fn listen_address(&self) -> Address {
        let port = self
            .port
            .unwrap_or_else(|| rand::thread_rng().gen_range(RANDOM_PORTS));
        Address::new(self.host.clone(), port)
    }

    /// Apply command-line overrides on top of the file values.
    pub fn override_with(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
        kind: Option<String>,
        directory: Option<Address>,
    ) {
        if let Some(host) = host {
            self.host = host;
        }
        if port.is_some() {
            self.port = port;
        }
        if let Some(kind) = kind {
            self.kind = kind;
        }
        if let Some(directory) = directory {
            self.directory = directory;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == PLACEHOLDER_TYPE {
            bail!("change the peer type to something unique (it is still '{PLACEHOLDER_TYPE}')");
        }
        if self.kind.is_empty() {
            bail!("peer type must not be empty");
        }
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_type() -> String {
    PLACEHOLDER_TYPE.to_string()
}

fn default_directory() -> Address {
    DEFAULT_DIRECTORY
        .parse()
        .unwrap_or_else(|_| Address::new("127.0.0.1", 40000))
}

fn default_database() -> PathBuf {
    PathBuf::from("dbs/fortune.db")
}

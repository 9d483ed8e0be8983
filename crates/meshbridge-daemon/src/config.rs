//! Daemon configuration.
//!
//! Settings come from an optional TOML file, overridden by command-line flags.
//! The node name is read once from `NODE_NAME` (or `--node-name`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use meshbridge_client::ClientConfig;
use serde::Deserialize;

use crate::endpoints::DEFAULT_ENDPOINTS_URL;

/// Well-known path of the mesh agent's socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/edgemesh/edgemesh.sock";

#[derive(Debug, Parser)]
#[command(name = "meshbridge", about = "Bridge the edge message bus to the mesh agent")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "MESHBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Name of this node.
    #[arg(long, env = "NODE_NAME", default_value = "")]
    pub node_name: String,
    /// Override the peer socket path.
    #[arg(long)]
    pub socket_path: Option<PathBuf>,
    /// Run the secondary local server.
    #[arg(long)]
    pub metaserver: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub metaserver: MetaServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enable: bool,
    pub socket_path: PathBuf,
    pub reconnect_delay_secs: u64,
    pub read_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enable: true,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            reconnect_delay_secs: meshbridge_client::RECONNECT_DELAY.as_secs(),
            read_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetaServerConfig {
    pub enable: bool,
    pub endpoints_url: String,
}

impl Default for MetaServerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            endpoints_url: DEFAULT_ENDPOINTS_URL.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(path) = &cli.socket_path {
            self.bridge.socket_path = path.clone();
        }
        if cli.metaserver {
            self.metaserver.enable = true;
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.bridge.socket_path);
        config.reconnect_delay = Duration::from_secs(self.bridge.reconnect_delay_secs);
        config.read_deadline = Duration::from_millis(self.bridge.read_timeout_ms);
        config
    }
}

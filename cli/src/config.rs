//! Node configuration file
use anyhow::{Context, Result};
use blockmesh_network::NetworkConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub testnet: bool,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "$HOME/.blockmesh".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Command-line values that win over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub peers: Vec<String>,
    pub testnet: bool,
    pub log_level: Option<String>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.data_dir {
            self.storage.data_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(listen) = overrides.listen {
            self.network.listen_addr = Some(listen);
        }
        // Peers from the command line are tried before the configured seeds
        if !overrides.peers.is_empty() {
            let mut peers = overrides.peers;
            peers.append(&mut self.network.seed_peers);
            self.network.seed_peers = peers;
        }
        if overrides.testnet {
            self.testnet = true;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_path(&self.storage.data_dir))
    }
}

fn expand_path(path: &str) -> String {
    path.replace("$HOME", &std::env::var("HOME").unwrap_or_default())
}

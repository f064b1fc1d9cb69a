//! # Application Configuration
//!
//! `TdsConfig` is read from an optional TOML file and then overridden by
//! CLI flags:
//!
//! ```toml
//! [store]
//! backend = "redb"
//! data_dir = "/var/lib/tds"
//! graph_mirror = true
//! mirror_outbox = true
//! index_prefix = "tds_"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! ```
//!
//! Security settings (`TDS_API_KEY`, `TDS_RATE_LIMIT`, `TDS_CORS_ORIGINS`)
//! stay in the environment and are read by the API layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tds_core::{StorageBackend, StoreConfig, TdsError};

/// Largest config file accepted (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TdsConfig {
    pub store: StoreConfig,
    pub server: ServerConfig,
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub backend: Option<StorageBackend>,
    pub no_graph: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl TdsConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, TdsError> {
        let config: Self =
            toml::from_str(text).map_err(|e| TdsError::InvalidConfig(e.to_string()))?;
        config.store.validate()?;
        Ok(config)
    }

    /// Read `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, TdsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            TdsError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(TdsError::InvalidConfig(format!(
                "{} is {} bytes, maximum is {MAX_CONFIG_FILE_SIZE}",
                path.display(),
                metadata.len()
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            TdsError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.data_dir {
            self.store.data_dir.clone_from(dir);
        }
        if let Some(backend) = overrides.backend {
            self.store.backend = backend;
        }
        if overrides.no_graph {
            self.store.graph_mirror = false;
        }
        if let Some(host) = &overrides.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }
}

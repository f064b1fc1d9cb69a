//! # Store Configuration
//!
//! Selects the storage backend and the optional pieces of the datastore.
//! Deserialized from the `[store]` table of the application's TOML config.

use crate::TdsError;
use crate::primitives::DEFAULT_INDEX_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Storage backend for all three stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile in-memory tables.
    Memory,
    /// redb database files under `data_dir`.
    #[default]
    Redb,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => f.write_str("memory"),
            StorageBackend::Redb => f.write_str("redb"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = TdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redb" => Ok(StorageBackend::Redb),
            other => Err(TdsError::InvalidConfig(format!(
                "unknown backend '{other}' (expected memory or redb)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StorageBackend,
    /// Directory holding the redb files. Ignored by the memory backend.
    pub data_dir: PathBuf,
    /// Maintain the graph mirror. Without it, derived-from searches fail.
    pub graph_mirror: bool,
    /// Queue failed mirror writes for replay instead of only logging them.
    pub mirror_outbox: bool,
    /// Prefix of search collections (`{prefix}{label}`).
    pub index_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("tds-data"),
            graph_mirror: true,
            mirror_outbox: true,
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
        }
    }
}

impl StoreConfig {
    /// Default configuration on the memory backend.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TdsError> {
        if self.index_prefix.is_empty() {
            return Err(TdsError::InvalidConfig(
                "index_prefix must not be empty".to_string(),
            ));
        }
        if !self
            .index_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(TdsError::InvalidConfig(format!(
                "index_prefix '{}' may only contain lowercase letters, digits, '_' and '-'",
                self.index_prefix
            )));
        }
        if self.backend == StorageBackend::Redb && self.data_dir.as_os_str().is_empty() {
            return Err(TdsError::InvalidConfig(
                "data_dir must be set for the redb backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::memory().validate().is_ok());
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("REDB".parse::<StorageBackend>().ok(), Some(StorageBackend::Redb));
        assert_eq!(" memory ".parse::<StorageBackend>().ok(), Some(StorageBackend::Memory));
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn bad_prefix_rejected() {
        let config = StoreConfig {
            index_prefix: "Bad Prefix".to_string(),
            ..StoreConfig::memory()
        };
        assert!(matches!(config.validate(), Err(TdsError::InvalidConfig(_))));
    }

    #[test]
    fn partial_table_fills_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"backend":"memory","graph_mirror":false}"#).expect("parse");
        assert_eq!(config.backend, StorageBackend::Memory);
        assert!(!config.graph_mirror);
        assert!(config.mirror_outbox);
        assert_eq!(config.index_prefix, DEFAULT_INDEX_PREFIX);
    }
}

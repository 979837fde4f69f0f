//! Ledger configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is a
//! complete configuration (in-memory store, enforced transitions, no index,
//! open authorization).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::error::StorageError;
use crate::objects::TransitionPolicy;
use crate::storage::{MemoryWorldState, WorldState};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("storage backend {0} is not compiled in")]
    Unsupported(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Where world state lives
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Volatile, lost on drop
    #[default]
    Memory,
    /// In memory, with every commit appended to a journal replayed on open
    Journal { path: PathBuf },
    Sqlite { path: PathBuf },
    #[serde(rename = "rocksdb")]
    RocksDb { path: PathBuf },
}

/// Top-level ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub transition_policy: TransitionPolicy,

    /// Maintain the `owner~id` index for QueryByOwner
    #[serde(default)]
    pub owner_index: bool,

    /// When set, only this organization may create tokens and only owners may
    /// transfer or change status. When unset every caller is allowed.
    #[serde(default)]
    pub issuer_msp: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl LedgerConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Open the configured world-state backend
    pub fn open_world_state(&self) -> Result<Arc<dyn WorldState>, ConfigError> {
        let store: Arc<dyn WorldState> = match &self.storage {
            StorageConfig::Memory => Arc::new(MemoryWorldState::new()),
            StorageConfig::Journal { path } => Arc::new(MemoryWorldState::open(path)?),
            StorageConfig::Sqlite { path } => open_sqlite(path)?,
            StorageConfig::RocksDb { path } => open_rocksdb(path)?,
        };
        Ok(store)
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &Path) -> Result<Arc<dyn WorldState>, ConfigError> {
    Ok(Arc::new(crate::storage::SqliteWorldState::new(path)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &Path) -> Result<Arc<dyn WorldState>, ConfigError> {
    Err(ConfigError::Unsupported("sqlite"))
}

#[cfg(feature = "rocksdb")]
fn open_rocksdb(path: &Path) -> Result<Arc<dyn WorldState>, ConfigError> {
    Ok(Arc::new(crate::storage::RocksDbWorldState::new(path)?))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocksdb(_path: &Path) -> Result<Arc<dyn WorldState>, ConfigError> {
    Err(ConfigError::Unsupported("rocksdb"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_object_is_default() {
        let config = LedgerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.transition_policy, TransitionPolicy::Enforced);
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn test_parse_full_config() {
        let config = LedgerConfig::from_json_str(
            r#"{
                "transition_policy": "permissive",
                "owner_index": true,
                "issuer_msp": "ReceitaMSP",
                "storage": { "backend": "journal", "path": "/var/lib/ledger/journal" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.transition_policy, TransitionPolicy::Permissive);
        assert!(config.owner_index);
        assert_eq!(config.issuer_msp.as_deref(), Some("ReceitaMSP"));
        assert_eq!(
            config.storage,
            StorageConfig::Journal {
                path: PathBuf::from("/var/lib/ledger/journal")
            }
        );

        let again = LedgerConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(matches!(
            LedgerConfig::from_json_str(r#"{"storage": {"backend": "tape"}}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_open_journal_backend_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ledger.json");
        let config = LedgerConfig {
            storage: StorageConfig::Journal {
                path: dir.path().join("journal"),
            },
            ..LedgerConfig::default()
        };
        std::fs::write(&config_path, config.to_json().unwrap()).unwrap();

        let loaded = LedgerConfig::from_json_file(&config_path).unwrap();
        let store = loaded.open_world_state().unwrap();
        assert_eq!(store.height().unwrap(), 0);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_open_sqlite_backend() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig {
            storage: StorageConfig::Sqlite {
                path: dir.path().join("ledger.db"),
            },
            ..LedgerConfig::default()
        };
        assert_eq!(config.open_world_state().unwrap().height().unwrap(), 0);
    }
}

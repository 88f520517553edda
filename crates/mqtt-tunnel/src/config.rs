use crate::error::Result;
use crate::store::{FileStorage, MemoryStorage, Storage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_SHARED_DEDUP_WINDOW: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: StorageKind,
    pub base_dir: PathBuf,
    pub enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Memory,
            base_dir: PathBuf::from("./mqtt_tunnel_store"),
            enabled: true,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_backend(mut self, backend: StorageKind) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Medium backing the packet stores of dedicated clients, or `None` when
    /// persistence is turned off.
    ///
    /// # Errors
    /// Returns `Storage` if the file backend directory cannot be prepared.
    pub fn open_storage(&self) -> Result<Option<Arc<dyn Storage>>> {
        if !self.enabled {
            return Ok(None);
        }
        let storage: Arc<dyn Storage> = match self.backend {
            StorageKind::Memory => Arc::new(MemoryStorage::global()),
            StorageKind::File => Arc::new(FileStorage::new(&self.base_dir)?),
        };
        Ok(Some(storage))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub persistence: PersistenceConfig,
    /// Number of recent shared-publish sequence numbers remembered to drop
    /// copies delivered through overlapping subscriptions.
    pub shared_dedup_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            shared_dedup_window: DEFAULT_SHARED_DEDUP_WINDOW,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn with_shared_dedup_window(mut self, window: usize) -> Self {
        self.shared_dedup_window = window.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence.backend, StorageKind::Memory);
        assert_eq!(config.shared_dedup_window, 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"persistence":{"backend":"File","base_dir":"/tmp/x"}}"#).unwrap();
        assert_eq!(config.persistence.backend, StorageKind::File);
        assert_eq!(config.persistence.base_dir, PathBuf::from("/tmp/x"));
        assert!(config.persistence.enabled);
        assert_eq!(config.shared_dedup_window, 1024);
    }

    #[test]
    fn test_disabled_persistence_has_no_storage() {
        let config = PersistenceConfig::new().with_persistence(false);
        assert!(config.open_storage().unwrap().is_none());
    }

    #[test]
    fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig::new()
            .with_backend(StorageKind::File)
            .with_base_dir(dir.path().join("store"));
        let storage = config.open_storage().unwrap().unwrap();
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        assert!(dir.path().join("store").is_dir());
    }

    #[test]
    fn test_dedup_window_never_zero() {
        assert_eq!(EngineConfig::new().with_shared_dedup_window(0).shared_dedup_window, 1);
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use super::{file_storage::FileStorage, memory_storage::MemoryStorage, no_storage::NoStorage};
use crate::config::{StorageBackendConfig, StorageConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage is disabled")]
    Disabled,
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("storage I/O failed: {0}")]
    Io(String),
}

/// Synchronous string key/value storage shared by every context of an origin,
/// the moral equivalent of `window.localStorage`.
///
/// Mutating calls return the previous value so callers can tell whether
/// anything actually changed.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<Option<String>, StorageError>;
    fn remove_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
    fn is_enabled(&self) -> bool {
        // Real backends are always enabled; NoStorage overrides this
        true
    }
}

/// Creates a concrete storage backend based on the StorageConfig.
/// If `storage.enabled = false`, returns NoStorage. A file backend that cannot
/// be opened falls back to memory so the context keeps working.
pub fn create_storage(config: &StorageConfig) -> Arc<dyn StorageBackend> {
    if !config.enabled {
        info!("Storage is disabled. Using NoStorage.");
        return Arc::new(NoStorage::new());
    }

    match &config.backend {
        Some(StorageBackendConfig::File(file_config)) => {
            match FileStorage::open(&file_config.path, config.quota_bytes) {
                Ok(storage) => {
                    info!("Using file storage at {}", file_config.path.display());
                    Arc::new(storage)
                }
                Err(e) => {
                    error!(
                        "Failed to open file storage at {}: {}. Falling back to memory.",
                        file_config.path.display(),
                        e
                    );
                    Arc::new(MemoryStorage::new(config.quota_bytes))
                }
            }
        }
        Some(StorageBackendConfig::Memory) | None => {
            info!("Using in-memory storage.");
            Arc::new(MemoryStorage::new(config.quota_bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_yields_no_storage() {
        let config = StorageConfig {
            enabled: false,
            ..Default::default()
        };
        let storage = create_storage(&config);
        assert!(!storage.is_enabled());
        assert_eq!(storage.get_item("k"), Err(StorageError::Disabled));
    }

    #[test]
    fn test_unopenable_file_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a storage file.
        let config = StorageConfig {
            backend: Some(StorageBackendConfig::File(crate::config::FileStorageConfig {
                path: dir.path().to_path_buf(),
            })),
            ..Default::default()
        };
        let storage = create_storage(&config);
        assert!(storage.is_enabled());
        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
    }
}

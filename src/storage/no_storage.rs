use super::{StorageBackend, StorageError};

/// A storage backend that refuses every call, as when the host has storage
/// turned off. Contexts using it run memory-only.
pub struct NoStorage;

impl NoStorage {
    pub fn new() -> Self {
        NoStorage
    }
}

impl Default for NoStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for NoStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Disabled)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Disabled)
    }

    fn remove_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Disabled)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{StorageBackend, StorageError};

/// In-memory storage with an optional byte quota (keys + values).
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new(quota: Option<usize>) -> Self {
        Self::from_entries(HashMap::new(), quota)
    }

    pub fn from_entries(items: HashMap<String, String>, quota: Option<usize>) -> Self {
        MemoryStorage {
            items: Mutex::new(items),
            quota,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usage(items: &HashMap<String, String>) -> usize {
        items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<Option<String>, StorageError> {
        let mut items = self.lock();
        if let Some(quota) = self.quota {
            let current = Self::usage(&items);
            let replaced = items.get(key).map(|old| key.len() + old.len()).unwrap_or(0);
            let needed = current - replaced + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }
        Ok(items.insert(key.to_string(), value.to_string()))
    }

    fn remove_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

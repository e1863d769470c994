use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use super::{memory_storage::MemoryStorage, StorageBackend, StorageError};

/// Storage mirrored to a JSON file so snapshots survive a restart.
///
/// Reads are served from memory; every mutation rewrites the file through a
/// temporary sibling and a rename.
pub struct FileStorage {
    path: PathBuf,
    inner: MemoryStorage,
    // Serializes flushes so the file never lags behind an older snapshot.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>, quota: Option<usize>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, String>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Storage file {} is corrupt ({}); starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };
        debug!("Loaded {} storage entries from {}", entries.len(), path.display());

        Ok(FileStorage {
            path,
            inner: MemoryStorage::from_entries(entries, quota),
            write_lock: Mutex::new(()),
        })
    }

    fn flush(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let text = serde_json::to_string(&self.inner.snapshot())
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io(e.to_string()))
    }

    /// Put the in-memory map back the way it was before a failed flush.
    fn restore(&self, key: &str, previous: Option<&str>) {
        let _ = match previous {
            Some(value) => self.inner.set_item(key, value),
            None => self.inner.remove_item(key),
        };
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<Option<String>, StorageError> {
        let previous = self.inner.set_item(key, value)?;
        if let Err(e) = self.flush() {
            self.restore(key, previous.as_deref());
            return Err(e);
        }
        Ok(previous)
    }

    fn remove_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let previous = self.inner.remove_item(key)?;
        if previous.is_some() {
            if let Err(e) = self.flush() {
                self.restore(key, previous.as_deref());
                return Err(e);
            }
        }
        Ok(previous)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let storage = FileStorage::open(&path, None).unwrap();
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();
        storage.remove_item("b").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path, None).unwrap();
        assert_eq!(reopened.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get_item("b").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::open(&path, None).unwrap();
        assert!(storage.keys().unwrap().is_empty());
    }
}

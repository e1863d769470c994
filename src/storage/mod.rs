pub mod area;
pub mod base;
pub mod file_storage;
pub mod memory_storage;
pub mod no_storage;

// Re-export the primary storage items so code outside can do
// "use crate::storage::{StorageBackend, create_storage};"
pub use area::{StorageArea, StorageEvent, StorageEvents, StorageView};
pub use base::{create_storage, StorageBackend, StorageError};

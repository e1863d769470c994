use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A wrapper for the storage configuration:
/// - enabled: if false, storage is disabled (NoStorage) and every context runs memory-only.
/// - backend: the actual storage backend (memory, file).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct StorageConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub backend: Option<StorageBackendConfig>,
    /// Lifetime of the persisted auth snapshot.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_in_ms: u64,
    /// Upper bound on the total bytes held by the backend, if any.
    #[serde(default)]
    pub quota_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: None,
            state_ttl_in_ms: default_state_ttl(),
            quota_bytes: None,
        }
    }
}

impl StorageConfig {
    pub fn state_ttl(&self) -> Duration {
        Duration::from_millis(self.state_ttl_in_ms)
    }
}

/// The existing storage backends, told apart by a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum StorageBackendConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "file")]
    File(FileStorageConfig),
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FileStorageConfig {
    pub path: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_state_ttl() -> u64 {
    60 * 60 * 1000
}

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::logging::LoggingConfig;
use super::storage::StorageConfig;

pub const DEFAULT_PREFIX: &str = "astro-stack-auth";
pub const DEFAULT_CHANNEL: &str = "astro-stack-auth-sync";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0. Every section has defaults, so an empty document is valid.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    /// Prefix shared by every key this crate writes to storage.
    #[serde(default = "default_prefix")]
    pub storage_prefix: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        Self {
            storage_prefix: default_prefix(),
            storage: StorageConfig::default(),
            boundary: BoundaryConfig::default(),
            refresh: RefreshConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigV1 {
    pub fn state_key(&self) -> String {
        format!("{}-state", self.storage_prefix)
    }

    pub fn sync_key(&self) -> String {
        format!("{}-sync", self.storage_prefix)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("storage_prefix must not be empty".into()));
        }
        if self.sync.channel_name.trim().is_empty() {
            return Err(ConfigError::Invalid("sync.channel_name must not be empty".into()));
        }
        if self.refresh.auto_refresh && self.refresh.interval_in_ms == 0 {
            return Err(ConfigError::Invalid(
                "refresh.interval_in_ms must be positive when auto_refresh is on".into(),
            ));
        }
        Ok(())
    }
}

/// Where the session/user endpoints live and how long to wait for them.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct BoundaryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path prefix in front of `/session` and `/user`.
    #[serde(default = "default_route_prefix")]
    pub prefix: String,
    #[serde(default = "default_timeout")]
    pub timeout_in_ms: u64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            prefix: default_route_prefix(),
            timeout_in_ms: default_timeout(),
        }
    }
}

impl BoundaryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_in_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default = "default_refresh_interval")]
    pub interval_in_ms: u64,
    /// Run `check_auth_status` once when a context is wired up.
    #[serde(default)]
    pub check_on_start: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            interval_in_ms: default_refresh_interval(),
            check_on_start: false,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.auto_refresh
            .then(|| Duration::from_millis(self.interval_in_ms))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_channel")]
    pub channel_name: String,
    /// How long the sentinel sync key lives before it is deleted again.
    #[serde(default = "default_sync_key_ttl")]
    pub sync_key_ttl_in_ms: u64,
    /// Hints from other contexts arriving within this window share one check.
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_in_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_name: default_channel(),
            sync_key_ttl_in_ms: default_sync_key_ttl(),
            coalesce_window_in_ms: default_coalesce_window(),
        }
    }
}

impl SyncConfig {
    pub fn sync_key_ttl(&self) -> Duration {
        Duration::from_millis(self.sync_key_ttl_in_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_in_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_base_url() -> String {
    "http://localhost:4321".to_string()
}

fn default_route_prefix() -> String {
    "/handler".to_string()
}

fn default_timeout() -> u64 {
    10_000
}

fn default_refresh_interval() -> u64 {
    5 * 60 * 1000
}

fn default_sync_key_ttl() -> u64 {
    50
}

fn default_coalesce_window() -> u64 {
    25
}

fn default_true() -> bool {
    true
}

/// Load config from a YAML file, with `AUTHSYNC_` environment overrides
/// (nested keys separated by `__`, e.g. `AUTHSYNC_BOUNDARY__BASE_URL`).
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigV1, ConfigError> {
    let figment = Figment::new()
        .merge(Yaml::file(path.as_ref()))
        .merge(Env::prefixed("AUTHSYNC_").split("__"));
    from_figment(figment)
}

/// Parse config from an in-memory YAML document.
pub fn parse_config(yaml: &str) -> Result<ConfigV1, ConfigError> {
    from_figment(Figment::new().merge(Yaml::string(yaml)))
}

fn from_figment(figment: Figment) -> Result<ConfigV1, ConfigError> {
    let config = match figment.extract::<Config>().map_err(Box::new)? {
        Config::ConfigV1(c) => c,
    };
    config.validate()?;
    Ok(config)
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() {
    let schema = schema_for!(Config);
    match serde_json::to_string_pretty(&schema) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render schema: {}", e),
    }
}

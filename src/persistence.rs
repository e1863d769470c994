//! Durable, prefix-scoped key/value cache on top of the shared storage area.
//!
//! Everything here is advisory: failures are logged (throttled), counted and
//! swallowed, and the in-memory store stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::{Metrics, MetricsRecorder};
use crate::models::PersistedState;
use crate::storage::{StorageError, StorageView};
use crate::utils::clock::{duration_millis, Clock, Millis};
use crate::utils::log_throttle::LogThrottle;

const STATE_KEY: &str = "state";
const OAUTH_STATE_KEY: &str = "oauth-state";
const REDIRECT_KEY: &str = "redirect";
const SHORT_LIVED_TTL: Duration = Duration::from_secs(10 * 60);
const FAILURE_LOG_WINDOW: Duration = Duration::from_secs(30);

/// The on-disk envelope for every persisted value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageItem<T> {
    pub value: T,
    pub timestamp: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Millis>,
}

impl<T> StorageItem<T> {
    /// Items stamped in the future, or so far in the past that the age
    /// overflows, count as expired.
    pub fn is_expired(&self, now: Millis) -> bool {
        match self.ttl {
            Some(ttl) => now
                .checked_sub(self.timestamp)
                .map_or(true, |age| age < 0 || age > ttl),
            None => false,
        }
    }
}

pub struct AuthPersistence {
    storage: StorageView,
    prefix: String,
    state_ttl: Duration,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    throttle: LogThrottle,
}

impl AuthPersistence {
    pub fn new(
        storage: StorageView,
        prefix: &str,
        state_ttl: Duration,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        AuthPersistence {
            storage,
            prefix: prefix.to_string(),
            state_ttl,
            clock,
            metrics,
            throttle: LogThrottle::new(FAILURE_LOG_WINDOW),
        }
    }

    /// Full storage key for a logical name, e.g. `state` -> `astro-stack-auth-state`.
    pub fn key(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }

    pub fn storage(&self) -> &StorageView {
        &self.storage
    }

    /// Wraps `value` with a timestamp and optional TTL and writes it.
    /// Returns false if the value could not be stored.
    pub fn set<T: Serialize>(&self, name: &str, value: &T, ttl: Option<Duration>) -> bool {
        let item = StorageItem {
            value,
            timestamp: self.clock.now_millis(),
            ttl: ttl.map(duration_millis),
        };
        let key = self.key(name);
        let text = match serde_json::to_string(&item) {
            Ok(text) => text,
            Err(e) => {
                warn!(key = key.as_str(), "Failed to serialize storage item: {}", e);
                return false;
            }
        };
        match self.storage.set_item(&key, &text) {
            Ok(()) => true,
            Err(e) => {
                self.degrade("set", &key, &e);
                false
            }
        }
    }

    /// Reads a value back. Corrupt or expired items are deleted and read as absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = self.key(name);
        let text = match self.storage.get_item(&key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                self.degrade("get", &key, &e);
                return None;
            }
        };

        let item = match serde_json::from_str::<StorageItem<T>>(&text) {
            Ok(item) => item,
            Err(e) => {
                warn!(
                    event_name = "persistence.item.corrupt",
                    event_domain = "persistence",
                    key = key.as_str(),
                    "Discarding unreadable storage item: {}",
                    e
                );
                self.remove(name);
                return None;
            }
        };

        if item.is_expired(self.clock.now_millis()) {
            debug!(key = key.as_str(), "Storage item expired; purging");
            self.remove(name);
            return None;
        }
        Some(item.value)
    }

    pub fn remove(&self, name: &str) -> bool {
        let key = self.key(name);
        match self.storage.remove_item(&key) {
            Ok(()) => true,
            Err(e) => {
                self.degrade("remove", &key, &e);
                false
            }
        }
    }

    /// Logical names of every key under this prefix.
    pub fn keys(&self) -> Vec<String> {
        let scope = self.key("");
        match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&scope).map(str::to_string))
                .collect(),
            Err(e) => {
                self.degrade("keys", &scope, &e);
                Vec::new()
            }
        }
    }

    /// Removes every key under this prefix and nothing else.
    pub fn clear(&self) -> bool {
        self.keys()
            .iter()
            .fold(true, |ok, name| self.remove(name) && ok)
    }

    pub fn save_state(&self, state: &PersistedState) -> bool {
        self.set(STATE_KEY, state, Some(self.state_ttl))
    }

    pub fn load_state(&self) -> Option<PersistedState> {
        self.get(STATE_KEY)
    }

    pub fn remove_state(&self) -> bool {
        self.remove(STATE_KEY)
    }

    /// Remembers the CSRF `state` parameter of an OAuth redirect.
    pub fn store_oauth_state(&self, state: &str) -> bool {
        self.set(OAUTH_STATE_KEY, &state, Some(SHORT_LIVED_TTL))
    }

    /// Consumes the stored OAuth state and reports whether it matches `expected`.
    pub fn take_oauth_state(&self, expected: &str) -> bool {
        let stored: Option<String> = self.get(OAUTH_STATE_KEY);
        self.remove(OAUTH_STATE_KEY);
        matches!(stored, Some(s) if !s.is_empty() && s == expected)
    }

    /// Remembers where to send the user after sign-in. Only same-origin
    /// paths are accepted.
    pub fn store_redirect_url(&self, url: &str) -> bool {
        if !is_local_path(url) {
            warn!(url, "Refusing to store non-local redirect target");
            return false;
        }
        self.set(REDIRECT_KEY, &url, Some(SHORT_LIVED_TTL))
    }

    pub fn take_redirect_url(&self) -> Option<String> {
        let url: Option<String> = self.get(REDIRECT_KEY);
        if url.is_some() {
            self.remove(REDIRECT_KEY);
        }
        url.filter(|u| is_local_path(u))
    }

    fn degrade(&self, operation: &str, key: &str, err: &StorageError) {
        self.metrics.record_storage_failure(operation);
        if let Some(suppressed_count) = self.throttle.should_emit(key) {
            warn!(
                event_name = "persistence.storage.failure",
                event_domain = "persistence",
                operation,
                key,
                suppressed_count,
                "Storage unavailable, continuing memory-only: {}",
                err
            );
        }
    }
}

/// Whether two raw values of the state key describe different sign-in states.
/// Timestamps are ignored; anything unreadable counts as a change.
pub fn snapshot_changed(old: Option<&str>, new: Option<&str>) -> bool {
    fn parse(raw: &str) -> Option<PersistedState> {
        serde_json::from_str::<StorageItem<PersistedState>>(raw)
            .ok()
            .map(|item| item.value)
    }

    match (old, new) {
        (None, None) => false,
        (Some(old), Some(new)) => match (parse(old), parse(new)) {
            (Some(old), Some(new)) => !old.same_identity(&new),
            _ => true,
        },
        _ => true,
    }
}

fn is_local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')
}

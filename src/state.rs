//! Per-context wiring.
//!
//! An [`Origin`] holds the host objects every context of one origin shares
//! (storage and broadcast channels). An [`AuthContext`] is one tab, window or
//! island attached to it: its own store, sync and facade, built once and
//! passed to whoever needs it.

use std::sync::{Arc, OnceLock};

use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthBoundary, AuthError, AuthStore, HttpBoundary};
use crate::config::ConfigV1;
use crate::metrics::Metrics;
use crate::persistence::AuthPersistence;
use crate::storage::{create_storage, StorageArea};
use crate::sync::{build_transports, AuthClient, AuthSync, BroadcastHub};
use crate::utils::clock::{Clock, SystemClock};

/// Host objects shared by every context of an origin. Cloning is cheap.
#[derive(Clone)]
pub struct Origin {
    pub storage: StorageArea,
    pub channels: BroadcastHub,
}

impl Origin {
    pub fn new(storage: StorageArea, channels: BroadcastHub) -> Self {
        Origin { storage, channels }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageArea::memory(), BroadcastHub::new())
    }

    pub fn from_config(config: &ConfigV1) -> Self {
        Self::new(
            StorageArea::new(create_storage(&config.storage)),
            BroadcastHub::new(),
        )
    }
}

/// Everything one execution context needs.
pub struct AuthContext {
    /// Configuration the context was built from.
    pub config: Arc<ConfigV1>,
    /// Store, sync and facade for this context.
    pub client: AuthClient,
    pub metrics: Metrics,
}

impl AuthContext {
    /// Builds a context with a fresh tab id and attaches it to `origin`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        config: Arc<ConfigV1>,
        origin: &Origin,
        boundary: Arc<dyn AuthBoundary>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        let tab_id = Uuid::new_v4().to_string();
        let storage = origin.storage.view(&tab_id);

        let persistence = AuthPersistence::new(
            storage.clone(),
            &config.storage_prefix,
            config.storage.state_ttl(),
            clock.clone(),
            metrics.clone(),
        );
        let store = AuthStore::new(persistence, boundary, clock.clone(), config.refresh.interval());

        let transports = if config.sync.enabled {
            build_transports(&config, &origin.channels, &storage, clock.clone())
        } else {
            Vec::new()
        };
        let sync = AuthSync::new(&tab_id, transports, clock, metrics.clone());
        let client = AuthClient::new(store, sync, config.sync.coalesce_window());

        info!(
            tab_id = tab_id.as_str(),
            authenticated = client.get_state().is_authenticated,
            "Auth context connected"
        );

        if config.refresh.check_on_start {
            let store = client.store().clone();
            tokio::spawn(async move { store.check_auth_status().await });
        }

        AuthContext {
            config,
            client,
            metrics,
        }
    }

    /// [`connect`](Self::connect) against the configured HTTP boundary and the system clock.
    pub fn connect_http(config: Arc<ConfigV1>, origin: &Origin) -> Result<Self, AuthError> {
        let metrics = Metrics::new();
        let boundary = HttpBoundary::new(&config.boundary, metrics.clone())?;
        Ok(Self::connect(
            config,
            origin,
            Arc::new(boundary),
            Arc::new(SystemClock),
            metrics,
        ))
    }

    pub fn tab_id(&self) -> &str {
        self.client.sync().tab_id()
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        self.client.store()
    }

    pub fn destroy(&self) {
        self.client.destroy();
    }
}

static DEFAULT_CONTEXT: OnceLock<Arc<AuthContext>> = OnceLock::new();

/// Get-or-create for the outermost integration layer only. Everything below
/// it should receive its context explicitly.
pub fn default_context(config: &ConfigV1) -> Result<Arc<AuthContext>, AuthError> {
    if let Some(context) = DEFAULT_CONTEXT.get() {
        return Ok(context.clone());
    }
    let origin = Origin::from_config(config);
    let created = Arc::new(AuthContext::connect_http(Arc::new(config.clone()), &origin)?);
    let winner = DEFAULT_CONTEXT.get_or_init(|| created.clone()).clone();
    if !Arc::ptr_eq(&winner, &created) {
        // Lost a race with another caller.
        created.destroy();
    }
    Ok(winner)
}

//! Long-running context for the `authsync` binary.
//!
//! Attaches one auth context to the configured origin, logs every state
//! transition, and tears it down on Ctrl-C.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ConfigV1;
use crate::state::{AuthContext, Origin};

/// Connects a context and keeps it alive until the process is interrupted.
///
/// # Errors
///
/// Returns an error if the HTTP boundary client cannot be built or the
/// interrupt handler cannot be installed.
pub async fn run(config: Arc<ConfigV1>) -> Result<(), Box<dyn std::error::Error>> {
    let origin = Origin::from_config(&config);
    let context = AuthContext::connect_http(config.clone(), &origin)?;

    info!(
        tab_id = context.tab_id(),
        transports = ?context.client.sync().transport_names(),
        boundary = config.boundary.base_url.as_str(),
        "Auth context running"
    );

    let _subscription = context.client.store().subscribe(|state| {
        info!(
            event_name = "auth.state.changed",
            event_domain = "auth",
            authenticated = state.is_authenticated,
            loading = state.is_loading,
            user_id = state.user.as_ref().map(|u| u.id.as_str()).unwrap_or(""),
            error = ?state.error,
            "Auth state changed"
        );
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");

    context.destroy();
    debug!("Final metrics:\n{}", context.metrics.render());
    Ok(())
}

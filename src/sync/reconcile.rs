//! Glue between the store and the sync layer.
//!
//! Local actions mutate the store and then broadcast a hint. Hints from other
//! contexts never touch the store directly: they only trigger a fresh
//! `check_auth_status` against the boundary, since any same-origin script can
//! forge a broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::broadcaster::AuthSync;
use crate::auth::AuthStore;
use crate::models::{AuthState, MessageType, Session, SyncMessage, User};

pub struct AuthClient {
    store: Arc<AuthStore>,
    sync: Arc<AuthSync>,
}

impl AuthClient {
    /// Hints arriving within `coalesce_window` of the first one share a
    /// single boundary check.
    pub fn new(store: Arc<AuthStore>, sync: Arc<AuthSync>, coalesce_window: Duration) -> Self {
        let target = Arc::downgrade(&store);
        let queued = Arc::new(AtomicBool::new(false));
        sync.on_message(move |message| {
            if !triggers_reconcile(message) {
                debug!(kind = %message.kind, "Sync message needs no reconciliation");
                return;
            }
            if queued.swap(true, Ordering::SeqCst) {
                debug!(
                    kind = %message.kind,
                    from = message.tab_id.as_str(),
                    "Hint folded into the pending re-check"
                );
                return;
            }
            let Some(store) = target.upgrade() else {
                return;
            };
            debug!(
                kind = %message.kind,
                from = message.tab_id.as_str(),
                "Re-checking auth status after hint from another context"
            );
            let queued = queued.clone();
            tokio::spawn(async move {
                if !coalesce_window.is_zero() {
                    tokio::time::sleep(coalesce_window).await;
                }
                // Hints from here on may postdate the answer, so they queue anew.
                queued.store(false, Ordering::SeqCst);
                store.check_auth_status().await;
            });
        });
        AuthClient { store, sync }
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<AuthSync> {
        &self.sync
    }

    pub fn get_state(&self) -> AuthState {
        self.store.get_state()
    }

    /// Records a completed sign-in and tells the other contexts.
    pub fn sign_in(&self, user: User, session: Session) {
        let user_id = user.id.clone();
        self.store.set_auth_data(user, session);
        info!(user_id = user_id.as_str(), "Signed in");
        self.sync
            .broadcast(MessageType::SignIn, json!({ "userId": user_id }));
    }

    /// Signs this context out and tells the other contexts.
    pub fn sign_out(&self) {
        self.store.clear_auth();
        info!("Signed out");
        self.sync.broadcast(MessageType::SignOut, Value::Null);
    }

    /// Refreshes the session and, if that changed who is signed in,
    /// tells the other contexts.
    pub async fn refresh(&self) {
        let before = self.store.get_state();
        self.store.refresh_session().await;
        let after = self.store.get_state();
        if let Some(kind) = change_hint(&before, &after) {
            self.sync.broadcast(kind, Value::Null);
        }
    }

    /// Re-derives state from the boundary without broadcasting.
    pub async fn reconcile(&self) {
        self.store.check_auth_status().await;
    }

    /// Tears down sync first so no late hint reaches a dead store.
    pub fn destroy(&self) {
        self.sync.destroy();
        self.store.destroy();
    }
}

fn triggers_reconcile(message: &SyncMessage) -> bool {
    match message.kind {
        MessageType::SignIn
        | MessageType::SignOut
        | MessageType::SessionRefresh
        | MessageType::AuthStateChange => true,
        // Nobody answers these; newcomers restore from storage instead.
        MessageType::SyncRequest => false,
    }
}

fn change_hint(before: &AuthState, after: &AuthState) -> Option<MessageType> {
    if before.is_authenticated && !after.is_authenticated {
        Some(MessageType::SignOut)
    } else if before.to_persisted().same_identity(&after.to_persisted()) {
        None
    } else {
        Some(MessageType::SessionRefresh)
    }
}

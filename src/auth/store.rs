//! The per-context owner of [`AuthState`].
//!
//! All mutations go through one lock and listeners are called synchronously,
//! in registration order, after the lock is released.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::boundary::AuthBoundary;
use super::error::AuthError;
use crate::models::{AuthPayload, AuthState, Session, User};
use crate::persistence::AuthPersistence;
use crate::utils::clock::Clock;
use crate::utils::scheduled_task::ScheduledTask;

pub type Listener = Arc<dyn Fn(&AuthState) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerSet {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.lock().iter().map(|(_, l)| l.clone()).collect()
    }
}

/// Handle returned by [`AuthStore::subscribe`].
pub struct Subscription {
    listeners: Weak<ListenerSet>,
    id: u64,
}

impl Subscription {
    /// Stops further notifications. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// What a mutation does to the persisted snapshot.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Persist {
    Skip,
    Save,
    Remove,
}

/// Which boundary call a check goes through.
#[derive(Clone, Copy, Debug)]
enum Check {
    Refresh,
    Status,
}

pub struct AuthStore {
    state: Mutex<AuthState>,
    listeners: Arc<ListenerSet>,
    persistence: AuthPersistence,
    boundary: Arc<dyn AuthBoundary>,
    clock: Arc<dyn Clock>,
    refresh_task: Mutex<Option<ScheduledTask>>,
    destroyed: AtomicBool,
}

impl AuthStore {
    /// Builds the store, restoring any unexpired snapshot, and starts
    /// auto-refresh when `refresh_interval` is set.
    pub fn new(
        persistence: AuthPersistence,
        boundary: Arc<dyn AuthBoundary>,
        clock: Arc<dyn Clock>,
        refresh_interval: Option<Duration>,
    ) -> Arc<Self> {
        let mut state = AuthState {
            last_updated: clock.now_millis(),
            ..Default::default()
        };
        if let Some(saved) = persistence.load_state() {
            state.user = saved.user;
            state.session = saved.session;
            state.last_updated = state.last_updated.max(saved.last_updated);
            // Never trust the stored flag.
            state.derive_authenticated();
            debug!(
                context_id = persistence.storage().context_id(),
                authenticated = state.is_authenticated,
                "Restored persisted auth snapshot"
            );
        }

        let store = Arc::new(AuthStore {
            state: Mutex::new(state),
            listeners: Arc::new(ListenerSet::default()),
            persistence,
            boundary,
            clock,
            refresh_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        if let Some(period) = refresh_interval {
            store.start_auto_refresh(period);
        }
        store
    }

    fn start_auto_refresh(self: &Arc<Self>, period: Duration) {
        let weak = Arc::downgrade(self);
        let task = ScheduledTask::start("auth-auto-refresh", period, move || {
            let weak = weak.clone();
            async move {
                let Some(store) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                if store.is_destroyed() {
                    return ControlFlow::Break(());
                }
                // refresh_session skips itself when signed out or busy.
                store.refresh_session().await;
                ControlFlow::Continue(())
            }
        });
        *self.lock_task() = task;
    }

    pub fn get_state(&self) -> AuthState {
        self.lock_state().clone()
    }

    pub fn persistence(&self) -> &AuthPersistence {
        &self.persistence
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.lock_task().as_ref().is_some_and(ScheduledTask::is_running)
    }

    /// Registers `listener` for every future mutation.
    pub fn subscribe(&self, listener: impl Fn(&AuthState) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub fn set_auth_data(&self, user: User, session: Session) {
        self.mutate(Persist::Save, |state| {
            state.user = Some(user);
            state.session = Some(session);
            state.error = None;
        });
    }

    /// Transient UI flag; not persisted.
    pub fn set_loading(&self, loading: bool) {
        self.mutate(Persist::Skip, |state| state.is_loading = loading);
    }

    /// Transient UI error; not persisted.
    pub fn set_error(&self, error: Option<AuthError>) {
        self.mutate(Persist::Skip, |state| state.error = error);
    }

    /// Signs this context out and deletes the persisted snapshot.
    pub fn clear_auth(&self) {
        self.mutate(Persist::Remove, |state| {
            state.user = None;
            state.session = None;
            state.error = None;
            state.is_loading = false;
        });
    }

    /// Re-validates the current session. Does nothing (and sends nothing)
    /// while a check is already running or nobody is signed in.
    pub async fn refresh_session(&self) {
        if !self.begin_loading(true) {
            debug!("Session refresh skipped: busy or signed out");
            return;
        }
        let result = self.boundary.fetch_session().await;
        self.apply(Check::Refresh, result);
    }

    /// Asks the boundary who is signed in, regardless of current state.
    pub async fn check_auth_status(&self) {
        if !self.begin_loading(false) {
            return;
        }
        let result = self.boundary.fetch_user().await;
        self.apply(Check::Status, result);
    }

    /// Stops auto-refresh and drops every listener. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut task) = self.lock_task().take() {
            task.stop();
        }
        self.listeners.lock().clear();
        info!(
            context_id = self.persistence.storage().context_id(),
            "Auth store destroyed"
        );
    }

    /// Atomically checks the refresh guard and raises `is_loading`.
    fn begin_loading(&self, require_auth: bool) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let snapshot = {
            let mut state = self.lock_state();
            if require_auth && (state.is_loading || !state.is_authenticated) {
                return false;
            }
            state.is_loading = true;
            self.stamp(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
        true
    }

    fn apply(&self, check: Check, result: Result<AuthPayload, AuthError>) {
        // The request may have outlived the context.
        if self.is_destroyed() {
            debug!(?check, "Discarding boundary result for destroyed store");
            return;
        }

        match result {
            Ok(payload) => match check {
                Check::Refresh => self.mutate(Persist::Save, |state| {
                    if let Some(user) = payload.user {
                        state.user = Some(user);
                    }
                    if let Some(session) = payload.session {
                        state.session = Some(session);
                    }
                    state.error = None;
                    state.is_loading = false;
                }),
                Check::Status => match payload.into_parts() {
                    Some((user, session)) => self.mutate(Persist::Save, |state| {
                        state.user = Some(user);
                        state.session = Some(session);
                        state.error = None;
                        state.is_loading = false;
                    }),
                    None => self.clear_auth(),
                },
            },
            Err(e) if e.is_authoritative() => {
                info!(?check, "Boundary reports no valid session; signing out");
                self.clear_auth();
            }
            Err(e) => {
                warn!(?check, "Auth check failed, keeping current session: {}", e);
                self.mutate(Persist::Skip, |state| {
                    state.error = Some(e);
                    state.is_loading = false;
                });
            }
        }
    }

    fn mutate(&self, persist: Persist, f: impl FnOnce(&mut AuthState)) {
        if self.is_destroyed() {
            return;
        }
        let snapshot = {
            let mut state = self.lock_state();
            f(&mut state);
            state.derive_authenticated();
            self.stamp(&mut state);
            state.clone()
        };

        match persist {
            Persist::Skip => {}
            Persist::Save => {
                self.persistence.save_state(&snapshot.to_persisted());
            }
            Persist::Remove => {
                self.persistence.remove_state();
            }
        }
        self.notify(&snapshot);
    }

    fn stamp(&self, state: &mut AuthState) {
        state.last_updated = state.last_updated.max(self.clock.now_millis());
    }

    fn notify(&self, snapshot: &AuthState) {
        for listener in self.listeners.snapshot() {
            listener(snapshot);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<ScheduledTask>> {
        self.refresh_task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AuthStore {
    fn drop(&mut self) {
        self.destroy();
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authsync::auth::{AuthBoundary, AuthError};
use authsync::config::{ConfigV1, RefreshConfig};
use authsync::metrics::Metrics;
use authsync::models::{AuthPayload, Session, User};
use authsync::state::{AuthContext, Origin};
use authsync::utils::clock::{Clock, ManualClock};

/// Scripted stand-in for the session/user endpoints.
pub struct FakeBoundary {
    response: Mutex<Result<AuthPayload, AuthError>>,
    pub session_calls: AtomicUsize,
    pub user_calls: AtomicUsize,
}

impl FakeBoundary {
    pub fn new(response: Result<AuthPayload, AuthError>) -> Arc<Self> {
        Arc::new(FakeBoundary {
            response: Mutex::new(response),
            session_calls: AtomicUsize::new(0),
            user_calls: AtomicUsize::new(0),
        })
    }

    pub fn signed_in(user_id: &str, session_id: &str) -> Arc<Self> {
        Self::new(Ok(payload(user_id, session_id)))
    }

    pub fn signed_out() -> Arc<Self> {
        Self::new(Err(AuthError::AuthExpired))
    }

    pub fn respond(&self, response: Result<AuthPayload, AuthError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.user_calls() + self.session_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBoundary for FakeBoundary {
    async fn fetch_session(&self) -> Result<AuthPayload, AuthError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }

    async fn fetch_user(&self) -> Result<AuthPayload, AuthError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

pub fn user(user_id: &str) -> User {
    User::new(user_id).with_email(format!("{}@example.com", user_id))
}

pub fn session(user_id: &str, session_id: &str) -> Session {
    Session::new(session_id, user_id)
}

pub fn payload(user_id: &str, session_id: &str) -> AuthPayload {
    AuthPayload {
        user: Some(user(user_id)),
        session: Some(session(user_id, session_id)),
    }
}

/// Default config without the background refresh timer.
pub fn test_config() -> ConfigV1 {
    ConfigV1 {
        refresh: RefreshConfig {
            auto_refresh: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn connect(
    config: &ConfigV1,
    origin: &Origin,
    boundary: Arc<FakeBoundary>,
    clock: &ManualClock,
) -> AuthContext {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    AuthContext::connect(
        Arc::new(config.clone()),
        origin,
        boundary,
        clock,
        Metrics::new(),
    )
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Gives in-flight deliveries time to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

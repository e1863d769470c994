use serde::{Deserialize, Serialize};

use super::user::{Session, User};
use crate::auth::AuthError;
use crate::utils::clock::Millis;

/// Snapshot of "who is logged in" for one context.
///
/// Only the store builds these, so `is_authenticated` always equals
/// `user.is_some() && session.is_some()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthState {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub is_loading: bool,
    pub is_authenticated: bool,
    pub error: Option<AuthError>,
    pub last_updated: Millis,
}

impl AuthState {
    pub(crate) fn derive_authenticated(&mut self) {
        self.is_authenticated = self.user.is_some() && self.session.is_some();
    }

    /// The part of the state that survives a reload.
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            user: self.user.clone(),
            session: self.session.clone(),
            is_authenticated: self.is_authenticated,
            last_updated: self.last_updated,
        }
    }
}

/// Durable snapshot written under `<prefix>-state`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub last_updated: Millis,
}

impl PersistedState {
    /// Same user, session and flag; timestamps are ignored.
    pub fn same_identity(&self, other: &PersistedState) -> bool {
        self.user == other.user
            && self.session == other.session
            && self.is_authenticated == other.is_authenticated
    }
}

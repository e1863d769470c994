use thiserror::Error;

/// Failures surfaced through `AuthState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The boundary answered 401: the caller is authoritatively signed out.
    #[error("session expired or not signed in")]
    AuthExpired,
    /// Anything that leaves the sign-in state unknown: transport errors,
    /// timeouts, unexpected statuses, undecodable bodies.
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// Set by the UI layer through `set_error`.
    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// True when the failure proves the user is signed out.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, AuthError::AuthExpired)
    }
}

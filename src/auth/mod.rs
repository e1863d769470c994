pub mod boundary;
pub mod error;
pub mod store;

// Re-exports so callers can do "use crate::auth::{AuthStore, AuthError};"
pub use boundary::{AuthBoundary, HttpBoundary};
pub use error::AuthError;
pub use store::{AuthStore, Listener, Subscription};

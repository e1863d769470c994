pub mod auth_state;
pub mod message;
pub mod user;

pub use auth_state::{AuthState, PersistedState};
pub use message::{MessageType, SyncMessage};
pub use user::{AuthPayload, Session, User};

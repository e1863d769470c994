//! Best-effort cross-context messaging and the reconciliation facade on top.

pub mod broadcaster;
pub mod channel;
pub mod reconcile;
pub mod storage_transport;
pub mod transport;

pub use broadcaster::{build_transports, AuthSync, MessageHandler};
pub use channel::{BroadcastHub, ChannelTransport};
pub use reconcile::AuthClient;
pub use storage_transport::StorageTransport;
pub use transport::{Inbound, Transport, TransportError};

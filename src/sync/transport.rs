use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::models::SyncMessage;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host has no broadcast channel support.
    #[error("broadcast channel unavailable")]
    Unavailable,
    #[error("transport closed")]
    Closed,
    #[error("failed to encode sync message: {0}")]
    Encode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A message as it arrived, tagged with the transport that carried it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub message: SyncMessage,
    pub transport: &'static str,
}

/// One way of moving [`SyncMessage`]s between contexts. Delivery is
/// best-effort, at most once per transport, and unordered.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn post(&self, message: &SyncMessage) -> Result<(), TransportError>;

    /// Starts forwarding messages from other contexts into `sink`.
    /// The returned task runs until aborted or the sink is dropped.
    fn listen(&self, sink: UnboundedSender<Inbound>) -> JoinHandle<()>;

    fn close(&self) {}
}

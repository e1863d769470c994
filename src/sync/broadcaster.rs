use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::channel::BroadcastHub;
use super::storage_transport::StorageTransport;
use super::transport::{Inbound, Transport};
use crate::config::ConfigV1;
use crate::metrics::{Metrics, MetricsRecorder};
use crate::models::{MessageType, SyncMessage};
use crate::storage::StorageView;
use crate::utils::clock::Clock;

pub type MessageHandler = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

/// How many message ids a context remembers to drop double deliveries.
const RECENT_IDS: usize = 128;

/// Picks the transports available to a context: the named channel when the
/// host supports it, plus storage events whenever storage works.
pub fn build_transports(
    config: &ConfigV1,
    hub: &BroadcastHub,
    storage: &StorageView,
    clock: Arc<dyn Clock>,
) -> Vec<Arc<dyn Transport>> {
    let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

    match hub.open(&config.sync.channel_name) {
        Ok(channel) => transports.push(Arc::new(channel)),
        Err(e) => info!("{}; syncing through storage events only", e),
    }

    if storage.is_enabled() {
        transports.push(Arc::new(StorageTransport::new(
            storage.clone(),
            &config.sync_key(),
            &config.state_key(),
            config.sync.sync_key_ttl(),
            clock,
        )));
    }

    if transports.is_empty() {
        warn!("No sync transport available; this context will not hear from others");
    }
    transports
}

/// Fan-out broadcaster and fan-in dispatcher for one context.
///
/// Every message it sends carries this context's `tab_id`; every message it
/// receives with that same id is dropped before handlers see it.
pub struct AuthSync {
    tab_id: String,
    transports: Vec<Arc<dyn Transport>>,
    handlers: Arc<Mutex<Vec<MessageHandler>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    destroyed: AtomicBool,
}

impl AuthSync {
    /// Attaches to every transport and announces this context with
    /// `SYNC_REQUEST`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        tab_id: &str,
        transports: Vec<Arc<dyn Transport>>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks: Vec<JoinHandle<()>> = transports
            .iter()
            .map(|transport| transport.listen(tx.clone()))
            .collect();
        drop(tx);

        let handlers: Arc<Mutex<Vec<MessageHandler>>> = Arc::default();
        tasks.push(tokio::spawn(dispatch(
            tab_id.to_string(),
            rx,
            handlers.clone(),
            metrics.clone(),
        )));

        let sync = Arc::new(AuthSync {
            tab_id: tab_id.to_string(),
            transports,
            handlers,
            tasks: Mutex::new(tasks),
            clock,
            metrics,
            destroyed: AtomicBool::new(false),
        });
        debug!(
            tab_id,
            transports = sync.transports.len(),
            "Sync attached"
        );
        sync.broadcast(MessageType::SyncRequest, Value::Null);
        sync
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    /// Registers a handler for messages from other contexts.
    pub fn on_message(&self, handler: impl Fn(&SyncMessage) + Send + Sync + 'static) {
        lock(&self.handlers).push(Arc::new(handler));
    }

    /// Sends a hint on every transport. Failures are logged per transport;
    /// the message is returned either way.
    pub fn broadcast(&self, kind: MessageType, payload: Value) -> SyncMessage {
        let message = SyncMessage::new(kind, payload, &self.tab_id, self.clock.now_millis());
        if self.destroyed.load(Ordering::SeqCst) {
            debug!(kind = %kind, "Not broadcasting from a destroyed context");
            return message;
        }

        for transport in &self.transports {
            match transport.post(&message) {
                Ok(()) => {
                    self.metrics
                        .record_sync_message("sent", kind.as_str(), transport.name());
                }
                Err(e) => warn!(
                    event_name = "sync.broadcast.failed",
                    event_domain = "sync",
                    transport = transport.name(),
                    kind = %kind,
                    "Failed to post sync message: {}",
                    e
                ),
            }
        }
        debug!(tab_id = self.tab_id.as_str(), kind = %kind, "Broadcast sync message");
        message
    }

    /// Stops listening, closes the transports and drops all handlers. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        for transport in &self.transports {
            transport.close();
        }
        lock(&self.handlers).clear();
        debug!(tab_id = self.tab_id.as_str(), "Sync detached");
    }
}

impl Drop for AuthSync {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn dispatch(
    tab_id: String,
    mut rx: UnboundedReceiver<Inbound>,
    handlers: Arc<Mutex<Vec<MessageHandler>>>,
    metrics: Metrics,
) {
    let mut recent = RecentIds::new(RECENT_IDS);
    while let Some(Inbound { message, transport }) = rx.recv().await {
        let kind = message.kind.as_str();
        if message.tab_id == tab_id {
            metrics.record_sync_message("suppressed", kind, transport);
            trace!(tab_id = tab_id.as_str(), kind, transport, "Dropping own sync message");
            continue;
        }
        if !message.id.is_empty() && !recent.insert(&message.id) {
            metrics.record_sync_message("duplicate", kind, transport);
            trace!(kind, transport, "Dropping sync message already seen");
            continue;
        }

        metrics.record_sync_message("received", kind, transport);
        debug!(
            tab_id = tab_id.as_str(),
            from = message.tab_id.as_str(),
            kind,
            transport,
            "Received sync message"
        );
        let handlers: Vec<MessageHandler> = lock(&handlers).clone();
        for handler in handlers {
            handler(&message);
        }
    }
}

/// Bounded memory of recently seen message ids.
struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        RecentIds {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// False if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

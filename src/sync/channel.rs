//! Named broadcast channels shared by every context of an origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{Inbound, Transport, TransportError};
use crate::models::SyncMessage;

const CHANNEL_CAPACITY: usize = 256;

/// Registry of named channels. A hub built with [`BroadcastHub::unsupported`]
/// behaves like a host without channel support.
#[derive(Clone)]
pub struct BroadcastHub {
    channels: Option<Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        BroadcastHub {
            channels: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn unsupported() -> Self {
        BroadcastHub { channels: None }
    }

    pub fn is_supported(&self) -> bool {
        self.channels.is_some()
    }

    pub fn open(&self, name: &str) -> Result<ChannelTransport, TransportError> {
        let channels = self.channels.as_ref().ok_or(TransportError::Unavailable)?;
        let sender = channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        Ok(ChannelTransport {
            name: name.to_string(),
            sender,
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Primary transport: posts serialized messages on a named channel.
pub struct ChannelTransport {
    name: String,
    sender: broadcast::Sender<String>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn channel_name(&self) -> &str {
        &self.name
    }

    /// Posts raw text, bypassing serialization. Lets peers (or tests) send
    /// whatever a foreign script could.
    pub fn post_raw(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        // Err only means nobody is listening right now.
        let _ = self.sender.send(text.to_string());
        Ok(())
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn post(&self, message: &SyncMessage) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.post_raw(&text)
    }

    fn listen(&self, sink: UnboundedSender<Inbound>) -> JoinHandle<()> {
        let mut rx = self.sender.subscribe();
        let channel = self.name.clone();
        tokio::spawn(async move {
            loop {
                let text = match rx.recv().await {
                    Ok(text) => text,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = channel.as_str(), skipped, "Sync channel lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let message = match serde_json::from_str::<SyncMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(channel = channel.as_str(), "Ignoring malformed sync message: {}", e);
                        continue;
                    }
                };
                if sink
                    .send(Inbound {
                        message,
                        transport: "channel",
                    })
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use serde_json::Value;
    use tokio::sync::mpsc;

    #[test]
    fn test_unsupported_hub_refuses_to_open() {
        let hub = BroadcastHub::unsupported();
        assert!(!hub.is_supported());
        assert!(matches!(hub.open("x"), Err(TransportError::Unavailable)));
    }

    #[tokio::test]
    async fn test_same_name_shares_a_channel() {
        let hub = BroadcastHub::new();
        let a = hub.open("auth-sync").unwrap();
        let b = hub.open("auth-sync").unwrap();
        let other = hub.open("unrelated").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = b.listen(tx);

        other
            .post(&SyncMessage::new(MessageType::SignIn, Value::Null, "a", 1))
            .unwrap();
        b.post_raw("not json").unwrap();
        a.post(&SyncMessage::new(MessageType::SignOut, Value::Null, "a", 2))
            .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.message.kind, MessageType::SignOut);
        assert_eq!(inbound.transport, "channel");
        task.abort();
    }

    #[test]
    fn test_closed_channel_rejects_posts() {
        let hub = BroadcastHub::new();
        let a = hub.open("auth-sync").unwrap();
        a.close();
        let msg = SyncMessage::new(MessageType::SignIn, Value::Null, "a", 1);
        assert_eq!(a.post(&msg), Err(TransportError::Closed));
    }
}

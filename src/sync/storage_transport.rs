//! Fallback transport: messages ride on storage change events.
//!
//! A message is written to the sync key (which fires a storage event in every
//! other context) and deleted again shortly after. Foreign writes to the
//! state key are surfaced too, as `AUTH_STATE_CHANGE` hints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::transport::{Inbound, Transport, TransportError};
use crate::models::{MessageType, SyncMessage};
use crate::persistence::snapshot_changed;
use crate::storage::{StorageEvent, StorageView};
use crate::utils::clock::Clock;

pub struct StorageTransport {
    storage: StorageView,
    sync_key: String,
    state_key: String,
    sentinel_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl StorageTransport {
    pub fn new(
        storage: StorageView,
        sync_key: &str,
        state_key: &str,
        sentinel_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        StorageTransport {
            storage,
            sync_key: sync_key.to_string(),
            state_key: state_key.to_string(),
            sentinel_ttl,
            clock,
        }
    }

    fn schedule_cleanup(&self) {
        let storage = self.storage.clone();
        let key = self.sync_key.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                let ttl = self.sentinel_ttl;
                runtime.spawn(async move {
                    tokio::time::sleep(ttl).await;
                    let _ = storage.remove_item(&key);
                });
            }
            // The event already fired; nothing left to wait for.
            Err(_) => {
                let _ = storage.remove_item(&key);
            }
        }
    }
}

/// Turns one foreign storage change into a message, if it is one we care about.
fn translate(
    event: &StorageEvent,
    sync_key: &str,
    state_key: &str,
    clock: &dyn Clock,
) -> Option<SyncMessage> {
    if event.key == sync_key {
        // Removal of the sentinel carries nothing.
        let text = event.new_value.as_deref()?;
        return match serde_json::from_str::<SyncMessage>(text) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Ignoring malformed sync sentinel: {}", e);
                None
            }
        };
    }

    if event.key == state_key
        && snapshot_changed(event.old_value.as_deref(), event.new_value.as_deref())
    {
        return Some(SyncMessage {
            kind: MessageType::AuthStateChange,
            payload: json!({ "source": "storage", "key": event.key }),
            timestamp: clock.now_millis(),
            tab_id: event.origin.clone(),
            id: String::new(),
        });
    }
    None
}

impl Transport for StorageTransport {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn post(&self, message: &SyncMessage) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.storage.set_item(&self.sync_key, &text)?;
        self.schedule_cleanup();
        Ok(())
    }

    fn listen(&self, sink: UnboundedSender<Inbound>) -> JoinHandle<()> {
        let mut events = self.storage.subscribe();
        let sync_key = self.sync_key.clone();
        let state_key = self.state_key.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(message) = translate(&event, &sync_key, &state_key, clock.as_ref()) else {
                    continue;
                };
                if sink
                    .send(Inbound {
                        message,
                        transport: "storage",
                    })
                    .is_err()
                {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageArea;
    use crate::utils::clock::ManualClock;
    use serde_json::Value;
    use tokio::sync::mpsc;

    const SYNC_KEY: &str = "astro-stack-auth-sync";
    const STATE_KEY: &str = "astro-stack-auth-state";

    fn transport(area: &StorageArea, id: &str) -> StorageTransport {
        StorageTransport::new(
            area.view(id),
            SYNC_KEY,
            STATE_KEY,
            Duration::from_millis(50),
            Arc::new(ManualClock::new(7)),
        )
    }

    #[tokio::test]
    async fn test_sentinel_is_delivered_then_removed() {
        let area = StorageArea::memory();
        let a = transport(&area, "a");
        let b = transport(&area, "b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = b.listen(tx);

        a.post(&SyncMessage::new(MessageType::SignIn, Value::Null, "a", 1))
            .unwrap();
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.message.kind, MessageType::SignIn);
        assert_eq!(inbound.message.tab_id, "a");
        assert_eq!(inbound.transport, "storage");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(area.view("probe").get_item(SYNC_KEY).unwrap(), None);
        assert!(rx.try_recv().is_err(), "removal must not produce a message");
        task.abort();
    }

    #[tokio::test]
    async fn test_foreign_state_write_becomes_hint() {
        let area = StorageArea::memory();
        let b = transport(&area, "b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = b.listen(tx);

        area.view("script").set_item(STATE_KEY, "{}").unwrap();
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.message.kind, MessageType::AuthStateChange);
        assert_eq!(inbound.message.tab_id, "script");
        assert_eq!(inbound.message.timestamp, 7);
        task.abort();
    }

    #[test]
    fn test_unrelated_keys_and_bad_sentinels_are_ignored() {
        let clock = ManualClock::new(0);
        let unrelated = StorageEvent {
            key: "theme".into(),
            old_value: None,
            new_value: Some("dark".into()),
            origin: "x".into(),
        };
        assert!(translate(&unrelated, SYNC_KEY, STATE_KEY, &clock).is_none());

        let garbage = StorageEvent {
            key: SYNC_KEY.into(),
            old_value: None,
            new_value: Some("{oops".into()),
            origin: "x".into(),
        };
        assert!(translate(&garbage, SYNC_KEY, STATE_KEY, &clock).is_none());
    }

    #[test]
    fn test_post_fails_when_storage_is_disabled() {
        let area = StorageArea::new(Arc::new(crate::storage::no_storage::NoStorage::new()));
        let a = transport(&area, "a");
        let result = a.post(&SyncMessage::new(MessageType::SignOut, Value::Null, "a", 1));
        assert!(matches!(result, Err(TransportError::Storage(_))));
    }
}

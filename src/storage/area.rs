//! Origin-wide storage plus change notifications, modeled on the web
//! `storage` event: every context sees changes made by the others, never its own.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use super::{memory_storage::MemoryStorage, StorageBackend, StorageError};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    /// Context id of the writer.
    pub origin: String,
}

/// Shared by every context of one origin. Cloning is cheap.
#[derive(Clone)]
pub struct StorageArea {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
}

impl StorageArea {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        StorageArea { backend, events }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStorage::default()))
    }

    /// Attach a context. Writes through the view are attributed to `context_id`.
    pub fn view(&self, context_id: &str) -> StorageView {
        StorageView {
            area: self.clone(),
            context_id: context_id.to_string(),
        }
    }

    fn notify(&self, event: StorageEvent) {
        // No receivers is fine: nobody else is listening yet.
        let _ = self.events.send(event);
    }
}

/// One context's handle on the shared storage area.
#[derive(Clone)]
pub struct StorageView {
    area: StorageArea,
    context_id: String,
}

impl StorageView {
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn is_enabled(&self) -> bool {
        self.area.backend.is_enabled()
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.area.backend.get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let old_value = self.area.backend.set_item(key, value)?;
        if old_value.as_deref() != Some(value) {
            self.area.notify(StorageEvent {
                key: key.to_string(),
                old_value,
                new_value: Some(value.to_string()),
                origin: self.context_id.clone(),
            });
        }
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if let Some(old_value) = self.area.backend.remove_item(key)? {
            self.area.notify(StorageEvent {
                key: key.to_string(),
                old_value: Some(old_value),
                new_value: None,
                origin: self.context_id.clone(),
            });
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.area.backend.keys()
    }

    /// Changes made by other contexts from now on.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            rx: self.area.events.subscribe(),
            context_id: self.context_id.clone(),
        }
    }
}

pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    context_id: String,
}

impl StorageEvents {
    /// Next foreign change, or `None` once the area is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.context_id => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        context_id = self.context_id.as_str(),
                        skipped, "storage listener lagged; events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_events_reach_other_contexts_only() {
        let area = StorageArea::memory();
        let a = area.view("a");
        let b = area.view("b");
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.set_item("k", "v").unwrap();

        let event = b_events.recv().await.unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value.as_deref(), Some("v"));
        assert_eq!(event.origin, "a");

        let own = timeout(Duration::from_millis(50), a_events.recv()).await;
        assert!(own.is_err(), "a context must not see its own writes");
    }

    #[tokio::test]
    async fn test_unchanged_writes_are_silent() {
        let area = StorageArea::memory();
        let a = area.view("a");
        let mut b_events = area.view("b").subscribe();

        a.set_item("k", "v").unwrap();
        a.set_item("k", "v").unwrap();
        a.remove_item("missing").unwrap();
        a.remove_item("k").unwrap();

        assert_eq!(b_events.recv().await.unwrap().new_value.as_deref(), Some("v"));
        let removal = b_events.recv().await.unwrap();
        assert_eq!(removal.old_value.as_deref(), Some("v"));
        assert_eq!(removal.new_value, None);
        let nothing = timeout(Duration::from_millis(50), b_events.recv()).await;
        assert!(nothing.is_err());
    }
}

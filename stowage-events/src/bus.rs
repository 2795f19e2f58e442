use serde::{Deserialize, Serialize};
use stowage_core::{BackendUsage, StorageType};
use tokio::sync::broadcast;
use tracing::debug;

/// Events published by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageEvent {
    /// A record was written.
    Updated {
        key: String,
        storage_type: StorageType,
    },

    /// A record was deleted.
    Removed {
        key: String,
        storage_type: StorageType,
    },

    /// A whole backend was emptied.
    Cleared { storage_type: StorageType },

    /// A backend crossed the warning threshold.
    CapacityWarning {
        storage_type: StorageType,
        usage: BackendUsage,
    },

    /// A backend crossed the critical threshold.
    CapacityCritical {
        storage_type: StorageType,
        usage: BackendUsage,
    },

    /// A retention cleanup pass finished.
    CleanupCompleted { removed: u64, freed: u64 },
}

impl StorageEvent {
    /// Stable wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            StorageEvent::Updated { .. } => "storage:updated",
            StorageEvent::Removed { .. } => "storage:removed",
            StorageEvent::Cleared { .. } => "storage:cleared",
            StorageEvent::CapacityWarning { .. } => "capacity:warning",
            StorageEvent::CapacityCritical { .. } => "capacity:critical",
            StorageEvent::CleanupCompleted { .. } => "capacity:cleanup",
        }
    }

    /// Key the event refers to, for record-level events.
    pub fn key(&self) -> Option<&str> {
        match self {
            StorageEvent::Updated { key, .. } | StorageEvent::Removed { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Process-wide publish/subscribe bus.
///
/// Cloning the bus is cheap and every clone publishes to the same set of
/// subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<StorageEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: StorageEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(
                    event_type = event_type,
                    receivers = receiver_count,
                    "Published storage event"
                );
            }
            Err(_) => {
                debug!(event_type = event_type, "No subscribers for storage event");
            }
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Pod lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodEvent {
    /// Event key (e.g., "pod.created", "pod.started")
    pub key: String,

    /// Pod the event refers to
    pub pod_id: String,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PodEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, pod_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pod_id: pod_id.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<PodEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Events without subscribers are dropped.
    pub fn emit(&self, event: PodEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const POD_CREATED: &str = "pod.created";
    pub const POD_STARTED: &str = "pod.started";
    pub const POD_STOPPED: &str = "pod.stopped";
    pub const POD_DELETED: &str = "pod.deleted";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();

        emitter.emit(PodEvent::new(events::POD_CREATED, "pod-1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "pod.created");
        assert_eq!(event.pod_id, "pod-1");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = EventEmitter::default();
        // Should not panic
        emitter.emit(PodEvent::new(events::POD_DELETED, "pod-1"));
    }
}

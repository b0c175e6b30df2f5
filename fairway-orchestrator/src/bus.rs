//! Event transport
//!
//! The dispatcher publishes outbound events (task `triggered`, sequence-level
//! `finished`) through the `EventSender` seam. The in-process implementation
//! is a tokio broadcast channel: every subscriber receives every published
//! event. Delivery to the engine is at-least-once; duplicates are absorbed by
//! the dispatcher's idempotence rule.

use async_trait::async_trait;
use tokio::sync::broadcast;

use fairway_core::domain::event::Event;

/// Error publishing an event to the transport.
#[derive(Debug, Clone)]
pub struct PublishError(pub String);

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to publish event: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

/// Outbound event publishing seam.
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send(&self, event: Event) -> Result<(), PublishError>;
}

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1024;

/// In-process event bus backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event; returns the number of subscribers that received it.
    ///
    /// An event published with no subscribers is dropped, which is fine for
    /// the engine: its own bookkeeping never depends on hearing back its own
    /// output.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSender for EventBus {
    async fn send(&self, event: Event) -> Result<(), PublishError> {
        self.publish(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let event = Event::new(
            "dev.delivery.mytask.triggered",
            Uuid::new_v4(),
            None,
            "fairway-orchestrator",
            json!({}),
        );
        let id = event.id;

        assert_eq!(bus.publish(event), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = Event::new(
            "dev.delivery.mytask.triggered",
            Uuid::new_v4(),
            None,
            "fairway-orchestrator",
            json!({}),
        );

        assert_eq!(bus.publish(event), 2);
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        let event = Event::new(
            "dev.delivery.mytask.triggered",
            Uuid::new_v4(),
            None,
            "fairway-orchestrator",
            json!({}),
        );
        assert_eq!(bus.publish(event), 0);
    }
}

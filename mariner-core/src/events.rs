use async_trait::async_trait;
use mariner_shared::models::events::DomainEvent;
use std::sync::Mutex;

use crate::CoreError;

/// Outbound sink for order lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), CoreError>;
}

/// Writes events to the tracing subscriber. Used when no broker is configured.
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), CoreError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| CoreError::PublishError(e.to_string()))?;
        tracing::info!(topic = event.topic(), key = %event.key(), "{}", payload);
        Ok(())
    }
}

/// Keeps published events in memory for inspection.
#[derive(Default)]
pub struct InMemoryPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), CoreError> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| CoreError::PublishError(e.to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mariner_shared::models::events::OrderRefundedEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_in_memory_publisher_records_events() {
        let publisher = InMemoryPublisher::new();
        let order_id = Uuid::new_v4();
        let event = DomainEvent::OrderRefunded(OrderRefundedEvent {
            order_id,
            released: 2,
            timestamp: 0,
        });

        publisher.publish(&event).await.unwrap();
        TracingPublisher.publish(&event).await.unwrap();

        let events = publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic(), "orders.refunded");
        assert_eq!(events[0].key(), order_id);
    }

    #[tokio::test]
    async fn test_poisoned_buffer_reports_publish_error() {
        let publisher = InMemoryPublisher::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = publisher.events.lock().unwrap();
            panic!("poison");
        }));

        let event = DomainEvent::OrderRefunded(OrderRefundedEvent {
            order_id: Uuid::new_v4(),
            released: 0,
            timestamp: 0,
        });
        let err = publisher.publish(&event).await.unwrap_err();
        assert!(matches!(err, CoreError::PublishError(_)));
        assert!(err.to_string().starts_with("Event publish failed"));
    }
}

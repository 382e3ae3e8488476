use serde_json::Value;
use tokio::sync::broadcast;

/// High-throughput event publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // Broadcast send() errors only when there are no subscribers,
        // which is acceptable for at-most-once notification delivery.
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a bed assignment completion event
    pub async fn publish_assignment_completed(
        &self,
        patient_id: &str,
        bed_id: &str,
        score: f64,
    ) -> Result<(), PublishError> {
        self.publish(
            crate::constants::events::ASSIGNMENT_COMPLETED,
            serde_json::json!({
                "patient_id": patient_id,
                "bed_id": bed_id,
                "score": score,
            }),
        )
        .await
    }

    /// Publish a workflow terminal-state event (completed or failed)
    pub async fn publish_workflow_finished(
        &self,
        workflow_id: uuid::Uuid,
        template: &str,
        succeeded: bool,
    ) -> Result<(), PublishError> {
        let name = if succeeded {
            crate::constants::events::WORKFLOW_COMPLETED
        } else {
            crate::constants::events::WORKFLOW_FAILED
        };
        self.publish(
            name,
            serde_json::json!({
                "workflow_id": workflow_id.to_string(),
                "template": template,
            }),
        )
        .await
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(16);
        assert!(publisher
            .publish("assignment.completed", json!({"bed": "ICU-1"}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher
            .publish("workflow.completed", json!({"workflow_id": "w1"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "workflow.completed");
        assert_eq!(event.context["workflow_id"], "w1");
    }
}

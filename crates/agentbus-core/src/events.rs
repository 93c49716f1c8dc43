//! Event publisher (spec §4.6, C6).

use std::sync::Arc;

use agentbus_ports::Queue;
use agentbus_types::{AgentBusError, TaskPendingMatchEvent};

#[derive(Clone)]
pub struct EventPublisher {
    queue: Arc<dyn Queue>,
    topic: String,
}

impl EventPublisher {
    pub fn new(queue: Arc<dyn Queue>, topic: impl Into<String>) -> Self {
        Self {
            queue,
            topic: topic.into(),
        }
    }

    /// Publishes a `TaskPendingMatch` event (spec §4.6). At-least-once;
    /// the matching consumer must be idempotent w.r.t. `taskId` (spec
    /// §4.8).
    pub async fn publish_task_pending_match(
        &self,
        task_id: &str,
        specification_uri: &str,
        requester_id: &str,
    ) -> Result<(), AgentBusError> {
        let event = TaskPendingMatchEvent::new(task_id, specification_uri, requester_id);
        let payload = serde_json::to_value(&event)
            .map_err(|e| AgentBusError::Queue(format!("failed to serialise event: {e}")))?;
        self.queue.publish(&self.topic, payload).await
    }
}

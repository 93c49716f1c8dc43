//! Message broker (spec §4.9, C13): an authorised relay between the
//! requester and the processor assigned to a task, fanning content onto
//! the durable queue as a [`BrokerQueueMessage`].

use std::sync::Arc;

use agentbus_observability::{emit_event, ObservabilityEvent, ProcessKind};
use agentbus_ports::{Queue, TaskStore};
use agentbus_types::{
    AgentBusError, BrokerQueueMessage, ContentType, MessageTarget, SenderRole, TaskStatus,
};
use chrono::Utc;
use serde_json::Value;

pub struct MessageBroker {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
    topic: String,
}

impl MessageBroker {
    pub fn new(task_store: Arc<dyn TaskStore>, queue: Arc<dyn Queue>, topic: impl Into<String>) -> Self {
        Self {
            task_store,
            queue,
            topic: topic.into(),
        }
    }

    /// `sendMessageToProcessor(taskId, requesterId, content)` (spec §4.9):
    /// asserts the caller is the task's requester, then enqueues for the
    /// assigned processor.
    pub async fn send_message_to_processor(
        &self,
        task_id: &str,
        requester_id: &str,
        content: Value,
    ) -> Result<(), AgentBusError> {
        let task = self.load_task(task_id).await?;
        if task.requester_id != requester_id {
            return Err(AgentBusError::Authorisation(format!(
                "requester '{requester_id}' is not the requester of task '{task_id}'"
            )));
        }
        let processor_id = task.assigned_processor_id.clone().ok_or_else(|| {
            AgentBusError::Database(format!("task '{task_id}' has no assigned processor yet"))
        })?;

        self.warn_if_not_executing(task_id, task.status);
        self.enqueue(
            MessageTarget::Processor,
            &processor_id,
            task_id,
            SenderRole::Requester,
            content,
        )
        .await
    }

    /// `sendMessageToRequester(taskId, processorId, content)` (spec §4.9):
    /// asserts the caller is the task's assigned processor, then enqueues
    /// for the requester.
    pub async fn send_message_to_requester(
        &self,
        task_id: &str,
        processor_id: &str,
        content: Value,
    ) -> Result<(), AgentBusError> {
        let task = self.load_task(task_id).await?;
        if task.assigned_processor_id.as_deref() != Some(processor_id) {
            return Err(AgentBusError::Authorisation(format!(
                "processor '{processor_id}' is not assigned to task '{task_id}'"
            )));
        }

        self.warn_if_not_executing(task_id, task.status);
        self.enqueue(
            MessageTarget::Requester,
            &task.requester_id,
            task_id,
            SenderRole::Processor,
            content,
        )
        .await
    }

    async fn load_task(&self, task_id: &str) -> Result<agentbus_types::Task, AgentBusError> {
        self.task_store
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))
    }

    fn warn_if_not_executing(&self, task_id: &str, status: TaskStatus) {
        if status != TaskStatus::Executing {
            emit_event(
                tracing::Level::WARN,
                ProcessKind::Server,
                ObservabilityEvent::new("broker.non_executing_message", "message_broker")
                    .with_task(task_id)
                    .with_status(&format!("{status:?}")),
            );
        }
    }

    async fn enqueue(
        &self,
        target: MessageTarget,
        target_id: &str,
        task_id: &str,
        sender_role: SenderRole,
        content: Value,
    ) -> Result<(), AgentBusError> {
        let message = BrokerQueueMessage {
            target,
            target_id: target_id.to_string(),
            task_id: task_id.to_string(),
            sender_role,
            content_type: ContentType::of(&content),
            content,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_value(&message)
            .map_err(|e| AgentBusError::Queue(format!("failed to serialise broker message: {e}")))?;
        self.queue.publish(&self.topic, payload).await
    }
}

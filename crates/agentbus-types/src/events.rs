use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Published on task-intake completion (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPendingMatchEvent {
    pub task_id: String,
    pub specification_uri: String,
    pub requester_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskPendingMatchEvent {
    pub fn new(
        task_id: impl Into<String>,
        specification_uri: impl Into<String>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            specification_uri: specification_uri.into(),
            requester_id: requester_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTarget {
    Processor,
    Requester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Requester,
    Processor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Json,
}

impl ContentType {
    /// `'text'` if the content is a JSON string, `'json'` otherwise (spec
    /// §4.9).
    pub fn of(content: &Value) -> Self {
        if content.is_string() {
            ContentType::Text
        } else {
            ContentType::Json
        }
    }
}

/// The durable-queue envelope relayed to the external channel (spec §6.2
/// "BrokerQueueMessage").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerQueueMessage {
    pub target: MessageTarget,
    pub target_id: String,
    pub task_id: String,
    pub sender_role: SenderRole,
    pub content_type: ContentType,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
}

/// Submission to the backend contract after matching (spec §6.2
/// "CandidateSubmission"). Exactly one of the two shapes is populated,
/// mirroring the `(workflowPlanUri | (candidateProcessorIds,
/// candidatePrices))` union from the spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateSubmission {
    WorkflowPlan {
        task_id: String,
        workflow_plan_uri: String,
    },
    CandidateList {
        task_id: String,
        candidate_processor_ids: Vec<String>,
        candidate_prices: Vec<f64>,
    },
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::TaskStatus;

/// The primary entity (spec §3). `taskId` is externally generated by the
/// backend contract and is immutable once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub requester_id: String,
    pub specification_uri: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_processor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_plan_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, requester_id: impl Into<String>, specification_uri: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            requester_id: requester_id.into(),
            specification_uri: specification_uri.into(),
            status: TaskStatus::PendingRegistration,
            assigned_processor_id: None,
            workflow_plan_uri: None,
            result_uri: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the task to `next`, refreshing `updated_at` (spec §3:
    /// "updatedAt refreshed on every mutation"). Returns a conflict error on
    /// an illegal transition rather than silently clamping it.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), crate::error::AgentBusError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::AgentBusError::Conflict(format!(
                "illegal transition {:?} -> {:?} for task {}",
                self.status, next, self.task_id
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Status entry shape stored in the cache (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedStatus {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_task_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CachedStatus {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            error: None,
            final_task_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_error(status: TaskStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            final_task_id: None,
            updated_at: Utc::now(),
        }
    }
}

//! The backend registration contract (spec §4.7 step 4, §6.4): an
//! external system that mints the globally unique, externally generated
//! `taskId` (spec §3 "Task": "externally generated by the backend"). Not
//! one of the seven capability ports in §1's C1 table, but still an
//! "external collaborator through a well-defined contract" per §1's
//! scoping rule, so it is specified here alongside the others.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use agentbus_types::{AgentBusError, CandidateSubmission};

/// Outcome of `createTaskOnContract` (spec §4.7 step 4): `(finalTaskId,
/// success, error?)`, modelled as a `Result` whose `Ok` carries the minted
/// id and whose `Err` carries the registration failure message.
#[async_trait]
pub trait BackendContract: Send + Sync {
    async fn create_task_on_contract(
        &self,
        requester_id: &str,
        specification_uri: &str,
    ) -> Result<String, AgentBusError>;

    /// `backend.updateTaskCandidates` (spec §4.8): submits either a
    /// workflow plan or a candidate shortlist, depending on which shape
    /// of [`CandidateSubmission`] matching produced.
    async fn update_task_candidates(
        &self,
        submission: &CandidateSubmission,
    ) -> Result<(), AgentBusError>;
}

/// HTTP-backed registration against `BACKEND_URL`/`BACKEND_API_KEY` (spec
/// §6.4).
pub struct HttpBackendContract {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpBackendContract {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl BackendContract for HttpBackendContract {
    async fn create_task_on_contract(
        &self,
        requester_id: &str,
        specification_uri: &str,
    ) -> Result<String, AgentBusError> {
        let url = format!("{}/tasks", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&json!({
            "requesterId": requester_id,
            "specificationUri": specification_uri,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| AgentBusError::Database(format!("backend registration transport error: {e}")))?;
        let status = response.status();
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentBusError::Database(format!("backend registration decode error: {e}")))?;
        if !status.is_success() {
            return Err(AgentBusError::Database(format!(
                "backend registration failed with status {status}: {value}"
            )));
        }
        value
            .get("taskId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentBusError::Database("backend registration response missing 'taskId'".into()))
    }

    async fn update_task_candidates(
        &self,
        submission: &CandidateSubmission,
    ) -> Result<(), AgentBusError> {
        let task_id = match submission {
            CandidateSubmission::WorkflowPlan { task_id, .. } => task_id,
            CandidateSubmission::CandidateList { task_id, .. } => task_id,
        };
        let url = format!(
            "{}/tasks/{}/candidates",
            self.base_url.trim_end_matches('/'),
            task_id
        );
        let mut req = self.client.post(&url).json(submission);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| AgentBusError::Database(format!("backend candidate submission transport error: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentBusError::Database(format!(
                "backend candidate submission failed with status {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// Mock-success registration used when `BACKEND_URL` is unset (spec §6.4:
/// "when absent a mock-success path is used and a synthetic taskId is
/// returned from registration").
#[derive(Default)]
pub struct MockBackendContract;

#[async_trait]
impl BackendContract for MockBackendContract {
    async fn create_task_on_contract(
        &self,
        _requester_id: &str,
        _specification_uri: &str,
    ) -> Result<String, AgentBusError> {
        Ok(format!("synthetic-{}", Uuid::new_v4()))
    }

    async fn update_task_candidates(
        &self,
        _submission: &CandidateSubmission,
    ) -> Result<(), AgentBusError> {
        Ok(())
    }
}

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentbus_types::{AgentBusError, CandidateSubmission, Processor, ProcessorStatus, Task, TaskStatus};

/// Durable task store (spec §3 "Task", §4.2). The durable record is
/// authoritative; only `agentbus-core::state` and
/// `agentbus-matching::service` are expected to call the write methods.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: Task) -> Result<(), AgentBusError>;
    async fn get_task_by_id(&self, task_id: &str) -> Result<Option<Task>, AgentBusError>;
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), AgentBusError>;
    async fn set_assigned_processor(
        &self,
        task_id: &str,
        processor_id: &str,
    ) -> Result<(), AgentBusError>;
    async fn set_workflow_plan_uri(
        &self,
        task_id: &str,
        workflow_plan_uri: &str,
    ) -> Result<(), AgentBusError>;
    async fn set_error(&self, task_id: &str, error: &str) -> Result<(), AgentBusError>;
    async fn apply_candidate_submission(
        &self,
        submission: &CandidateSubmission,
    ) -> Result<(), AgentBusError>;
}

/// Durable processor catalog (spec §3 "Processor", §6.3 row schema).
#[async_trait]
pub trait ProcessorStore: Send + Sync {
    async fn get(&self, processor_id: &str) -> Result<Option<Processor>, AgentBusError>;
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Processor>, AgentBusError>;
    /// Tag-intersection query (spec §4.8.1(a)): processors whose
    /// `capabilityTags` intersect `tags`, filtered to `Active`.
    async fn find_by_tags(&self, tags: &BTreeSet<String>) -> Result<Vec<Processor>, AgentBusError>;
    /// First page of active processors, capped at `limit` — used by the
    /// `DISABLE_PROCESSOR_FILTERING` escape hatch (spec §4.8.1).
    async fn list_active(&self, limit: usize) -> Result<Vec<Processor>, AgentBusError>;
    async fn update_status(
        &self,
        processor_id: &str,
        status: ProcessorStatus,
    ) -> Result<(), AgentBusError>;
}

/// Namespaced, TTL'd key-value cache (spec §4.2). Values are opaque bytes;
/// callers (de)serialise their own JSON, matching a Redis-style contract.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AgentBusError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AgentBusError>;
    async fn delete(&self, key: &str) -> Result<(), AgentBusError>;
    /// Writes every entry as a single multi-command transaction (spec
    /// §4.2 "Linking"): either all entries land or none do.
    async fn multi_set(&self, entries: Vec<(String, Vec<u8>, Duration)>) -> Result<(), AgentBusError>;
}

/// Embedding vector index keyed by `processorId` (spec §3 "Processor": "An
/// embedding of `description` lives in the vector index"; §6.3).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: Value,
    ) -> Result<(), AgentBusError>;
    /// Top-`top_k` neighbours by cosine similarity, optionally filtered by
    /// metadata equality (e.g. `{"status": "Active"}`).
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        metadata_filter: Option<&Value>,
    ) -> Result<Vec<(String, f32)>, AgentBusError>;
}

/// Content-addressable-ish blob store for specs and workflow plans (spec
/// §6.3 "Blob paths").
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `value` at a path derived from `path_hint` and returns the
    /// resulting opaque URI.
    async fn store_json(&self, path_hint: &str, value: &Value) -> Result<String, AgentBusError>;
    async fn get_json(&self, uri: &str) -> Result<Value, AgentBusError>;
}

/// Durable at-least-once queue (spec §4.6, §5 "Queue semantics").
#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), AgentBusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
        }
    }
}

/// A declared tool the LM may invoke (spec §4.4, glossary "Tool call").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Chat + tool-use + embeddings contract (spec §1 C1 "language model (chat
/// + tool-use + embeddings)").
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentBusError>;

    /// Embeds a single string; used for the task-description embedding in
    /// C8/C10.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, AgentBusError> {
        let mut batch = self.embed_batch(model, vec![text.to_string()]).await?;
        batch.pop().ok_or_else(|| {
            AgentBusError::LanguageModel("embedding provider returned no vectors".into())
        })
    }

    /// Batched embedding. Implementations must chunk to at most 512 items
    /// and issue chunks sequentially (spec §5 "Parallel operations").
    async fn embed_batch(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError>;
}

/// HTTP health prober (spec §4.8.2).
#[async_trait]
pub trait HttpProber: Send + Sync {
    /// `true` iff a GET to `url` within `timeout` returns a 2xx status.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<bool, AgentBusError>;
}

/// Best-effort cosine similarity over two embeddings, clamped to `[0, 1]`
/// (spec §4.8.3: "negative similarities clamp to 0").
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_opposite_vectors_clamps_to_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}

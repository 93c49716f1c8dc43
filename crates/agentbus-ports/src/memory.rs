//! In-process reference adapters for every capability port. Grounded in the
//! teacher's `RwLock<HashMap<...>>` registries (see `tandem-server`'s
//! `RunRegistry`) — good enough to run the whole workspace, including its
//! tests, with zero external infrastructure. Any real backend is a drop-in
//! trait implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use agentbus_types::{
    AgentBusError, CandidateSubmission, Processor, ProcessorStatus, Task, TaskStatus,
};

use crate::traits::{BlobStore, Cache, ProcessorStore, Queue, TaskStore, VectorIndex};

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

/// In-memory `Cache` with real TTL expiry, grounded in the teacher's
/// `RunRegistry`/`EngineLease` expiry checks (`is_expired`).
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Expiring<Vec<u8>>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AgentBusError> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AgentBusError> {
        let mut guard = self.entries.write().await;
        guard.insert(
            key.to_string(),
            Expiring {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AgentBusError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>, Duration)>) -> Result<(), AgentBusError> {
        let mut guard = self.entries.write().await;
        let now = Instant::now();
        for (key, value, ttl) in entries {
            guard.insert(
                key,
                Expiring {
                    value,
                    expires_at: now + ttl,
                },
            );
        }
        Ok(())
    }
}

/// In-memory `TaskStore`. The durable record (spec §3 "Ownership"): every
/// write method refreshes `updatedAt` through [`Task::transition`] or a
/// direct field write, matching the durable row's trigger-maintained
/// timestamp (spec §6.3).
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<(), AgentBusError> {
        let mut guard = self.tasks.write().await;
        if guard.contains_key(&task.task_id) {
            return Err(AgentBusError::Conflict(format!(
                "task '{}' already exists",
                task.task_id
            )));
        }
        guard.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get_task_by_id(&self, task_id: &str) -> Result<Option<Task>, AgentBusError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), AgentBusError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(task_id)
            .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))?;
        task.transition(status)
    }

    async fn set_assigned_processor(
        &self,
        task_id: &str,
        processor_id: &str,
    ) -> Result<(), AgentBusError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(task_id)
            .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))?;
        task.assigned_processor_id = Some(processor_id.to_string());
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_workflow_plan_uri(
        &self,
        task_id: &str,
        workflow_plan_uri: &str,
    ) -> Result<(), AgentBusError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(task_id)
            .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))?;
        task.workflow_plan_uri = Some(workflow_plan_uri.to_string());
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_error(&self, task_id: &str, error: &str) -> Result<(), AgentBusError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .get_mut(task_id)
            .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))?;
        task.error = Some(error.to_string());
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn apply_candidate_submission(
        &self,
        submission: &CandidateSubmission,
    ) -> Result<(), AgentBusError> {
        match submission {
            CandidateSubmission::WorkflowPlan {
                task_id,
                workflow_plan_uri,
            } => self.set_workflow_plan_uri(task_id, workflow_plan_uri).await,
            CandidateSubmission::CandidateList { task_id, .. } => {
                // Candidate-list submissions are recorded on the task
                // record only via status transitions; the candidate ids
                // themselves are relayed to the backend contract, not
                // persisted redundantly in the durable row (spec §6.2).
                let guard = self.tasks.read().await;
                if !guard.contains_key(task_id) {
                    return Err(AgentBusError::NotFound(format!(
                        "task '{task_id}' not found"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// In-memory `ProcessorStore` (spec §6.3 row schema). Tag-intersection
/// query scans linearly — adequate for the reference adapter; a real
/// backend uses the indexed `capabilities_tags` array-overlap query.
#[derive(Clone, Default)]
pub struct MemoryProcessorStore {
    processors: Arc<RwLock<HashMap<String, Processor>>>,
}

impl MemoryProcessorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, processor: Processor) {
        self.processors
            .write()
            .await
            .insert(processor.processor_id.clone(), processor);
    }
}

#[async_trait]
impl ProcessorStore for MemoryProcessorStore {
    async fn get(&self, processor_id: &str) -> Result<Option<Processor>, AgentBusError> {
        Ok(self.processors.read().await.get(processor_id).cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Processor>, AgentBusError> {
        let guard = self.processors.read().await;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn find_by_tags(&self, tags: &BTreeSet<String>) -> Result<Vec<Processor>, AgentBusError> {
        let guard = self.processors.read().await;
        Ok(guard
            .values()
            .filter(|p| {
                p.status == ProcessorStatus::Active
                    && !tags.is_empty()
                    && p.capability_tags.intersection(tags).next().is_some()
            })
            .cloned()
            .collect())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Processor>, AgentBusError> {
        let guard = self.processors.read().await;
        Ok(guard
            .values()
            .filter(|p| p.status == ProcessorStatus::Active)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        processor_id: &str,
        status: ProcessorStatus,
    ) -> Result<(), AgentBusError> {
        let mut guard = self.processors.write().await;
        let processor = guard.get_mut(processor_id).ok_or_else(|| {
            AgentBusError::NotFound(format!("processor '{processor_id}' not found"))
        })?;
        processor.status = status;
        processor.last_checked_at = Some(chrono::Utc::now());
        Ok(())
    }
}

/// In-memory `VectorIndex`, brute-force cosine similarity. Skipped
/// silently by C8 when unavailable (spec §4.8.1); this adapter is always
/// available, so discovery exercises the semantic branch in tests.
#[derive(Clone, Default)]
pub struct MemoryVectorIndex {
    entries: Arc<RwLock<HashMap<String, (Vec<f32>, Value)>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: &str, embedding: Vec<f32>, metadata: Value) -> Result<(), AgentBusError> {
        self.entries
            .write()
            .await
            .insert(id.to_string(), (embedding, metadata));
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        metadata_filter: Option<&Value>,
    ) -> Result<Vec<(String, f32)>, AgentBusError> {
        let guard = self.entries.read().await;
        let mut scored: Vec<(String, f32)> = guard
            .iter()
            .filter(|(_, (_, meta))| match metadata_filter {
                None => true,
                Some(filter) => metadata_subset(filter, meta),
            })
            .map(|(id, (vec, _))| {
                (id.clone(), crate::traits::cosine_similarity(embedding, vec) as f32)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn metadata_subset(filter: &Value, candidate: &Value) -> bool {
    match (filter, candidate) {
        (Value::Object(filter_map), Value::Object(candidate_map)) => filter_map
            .iter()
            .all(|(k, v)| candidate_map.get(k).map(|cv| cv == v).unwrap_or(false)),
        _ => false,
    }
}

/// Filesystem-backed `BlobStore` (spec §6.3 "Blob paths"). Writes under
/// `root/<path_hint>` and returns a `file://` URI; `store_json` is
/// idempotent-safe to call repeatedly with the same content (spec §8
/// "storeJson(spec) ∘ getJson = identity").
#[derive(Clone)]
pub struct FilesystemBlobStore {
    root: std::path::PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn store_json(&self, path_hint: &str, value: &Value) -> Result<String, AgentBusError> {
        let full_path = self.root.join(path_hint);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentBusError::Storage(format!("failed to create blob dir: {e}")))?;
        }
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise blob: {e}")))?;
        tokio::fs::write(&full_path, bytes)
            .await
            .map_err(|e| AgentBusError::Storage(format!("failed to write blob: {e}")))?;
        Ok(format!("file://{}", full_path.display()))
    }

    async fn get_json(&self, uri: &str) -> Result<Value, AgentBusError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AgentBusError::Storage(format!("failed to read blob '{uri}': {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AgentBusError::Storage(format!("failed to parse blob '{uri}': {e}")))
    }
}

/// In-memory `Queue`, an unbounded mpsc channel per process (spec §5
/// "Queue semantics": at-least-once; grounded in the teacher's
/// broadcast-based `EventBus`, narrowed to single-consumer mpsc since the
/// matching worker is the sole consumer of `task-pending-match`).
#[derive(Clone)]
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<(String, Value)>,
}

pub struct InMemoryQueueReceiver {
    pub receiver: mpsc::UnboundedReceiver<(String, Value)>,
}

impl InMemoryQueue {
    pub fn new() -> (Self, InMemoryQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, InMemoryQueueReceiver { receiver })
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), AgentBusError> {
        self.sender
            .send((topic.to_string(), payload))
            .map_err(|e| AgentBusError::Queue(format!("failed to publish to '{topic}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_types::PricingModel;
    use std::collections::BTreeSet;

    fn sample_processor(id: &str, tags: &[&str]) -> Processor {
        Processor {
            processor_id: id.into(),
            name: id.into(),
            description: "a processor".into(),
            capability_tags: tags.iter().map(|s| s.to_string()).collect(),
            input_schema: None,
            output_schema: None,
            endpoint_url: "https://example.com".into(),
            status: ProcessorStatus::Active,
            reputation_score: 4.0,
            completed_tasks: 0,
            success_rate: 0.9,
            average_execution_time_ms: 1000.0,
            pricing: agentbus_types::Pricing {
                model: PricingModel::Flat,
                price: 1.0,
                unit: "task".into(),
            },
            last_checked_at: None,
        }
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn multi_set_writes_both_keys_atomically() {
        let cache = MemoryCache::new();
        cache
            .multi_set(vec![
                ("a".into(), b"1".to_vec(), Duration::from_secs(60)),
                ("b".into(), b"2".to_vec(), Duration::from_secs(60)),
            ])
            .await
            .unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(cache.get("b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn processor_store_tag_intersection() {
        let store = MemoryProcessorStore::new();
        store.upsert(sample_processor("p1", &["pdf"])).await;
        store.upsert(sample_processor("p2", &["ocr"])).await;
        let tags: BTreeSet<String> = ["pdf".to_string()].into();
        let found = store.find_by_tags(&tags).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].processor_id, "p1");
    }

    #[tokio::test]
    async fn task_store_rejects_duplicate_create() {
        let store = MemoryTaskStore::new();
        let task = Task::new("t1", "u1", "blob://x");
        store.create_task(task.clone()).await.unwrap();
        assert!(store.create_task(task).await.is_err());
    }

    #[tokio::test]
    async fn vector_index_orders_by_similarity() {
        let index = MemoryVectorIndex::new();
        index
            .upsert("a", vec![1.0, 0.0], serde_json::json!({"status": "Active"}))
            .await
            .unwrap();
        index
            .upsert("b", vec![0.0, 1.0], serde_json::json!({"status": "Active"}))
            .await
            .unwrap();
        let results = index.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results[0].0, "a");
    }
}

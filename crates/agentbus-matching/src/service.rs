//! Matching service (spec §4.8, C12): the queue-driven consumer that turns
//! a `TaskPendingMatch` event into either a workflow plan or a candidate
//! shortlist submitted back to the backend contract.

use std::sync::Arc;

use agentbus_core::TaskStateManager;
use agentbus_observability::{emit_event, ObservabilityEvent, ProcessKind};
use agentbus_ports::{AppConfig, BackendContract, BlobStore, HttpProber, LanguageModel, ProcessorStore, TaskStore, VectorIndex};
use agentbus_types::{AgentBusError, CachedStatus, CandidateSubmission, TaskSpecification, TaskStatus};

use crate::discovery::discover_candidates;
use crate::evaluator::evaluate_and_rank;
use crate::health::filter_healthy;
use crate::workflow::synthesize_workflow;

pub struct MatchingService {
    task_store: Arc<dyn TaskStore>,
    processor_store: Arc<dyn ProcessorStore>,
    cache: Arc<TaskStateManager>,
    blob: Arc<dyn BlobStore>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    lm: Arc<dyn LanguageModel>,
    prober: Arc<dyn HttpProber>,
    backend: Arc<dyn BackendContract>,
    config: Arc<AppConfig>,
}

impl MatchingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        processor_store: Arc<dyn ProcessorStore>,
        cache: Arc<TaskStateManager>,
        blob: Arc<dyn BlobStore>,
        vector_index: Option<Arc<dyn VectorIndex>>,
        lm: Arc<dyn LanguageModel>,
        prober: Arc<dyn HttpProber>,
        backend: Arc<dyn BackendContract>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            task_store,
            processor_store,
            cache,
            blob,
            vector_index,
            lm,
            prober,
            backend,
            config,
        }
    }

    /// Handles a single `TaskPendingMatch` event (spec §4.8 pseudocode).
    /// Idempotent skips and terminal classifications (`Failed`,
    /// `NoMatchFound`, `MatchingFailed`) are handled internally and
    /// reported via `Ok(())`; only an unexpected infrastructure failure
    /// while performing the handling itself propagates as `Err` so the
    /// worker loop can log and retry on the next delivery.
    pub async fn handle_task_pending_match(&self, task_id: &str) -> Result<(), AgentBusError> {
        let Some(task) = self.task_store.get_task_by_id(task_id).await? else {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.task_not_found", "matching_service").with_task(task_id),
            );
            self.cache
                .set_status(task_id, CachedStatus::with_error(TaskStatus::Failed, "task not found"))
                .await?;
            return Ok(());
        };

        if task.status.is_matching_already_settled_or_running() {
            emit_event(
                tracing::Level::DEBUG,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.idempotent_skip", "matching_service")
                    .with_task(task_id)
                    .with_status(&format!("{:?}", task.status)),
            );
            return Ok(());
        }
        if !task.status.is_matching_eligible() {
            self.settle(task_id, TaskStatus::Failed, "task is not in a matching-eligible status")
                .await;
            return Ok(());
        }

        self.task_store.update_status(task_id, TaskStatus::Matching).await?;
        self.cache.set_status(task_id, CachedStatus::new(TaskStatus::Matching)).await?;

        let spec_value = self.blob.get_json(&task.specification_uri).await?;
        let spec: TaskSpecification = match serde_json::from_value(spec_value) {
            Ok(spec) => spec,
            Err(e) => {
                self.settle(task_id, TaskStatus::MatchingFailed, &format!("corrupt task specification: {e}"))
                    .await;
                return Ok(());
            }
        };

        let candidates = match discover_candidates(
            &spec,
            self.processor_store.as_ref(),
            self.vector_index.as_deref(),
            Some(self.lm.as_ref()),
            &self.config,
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                self.settle(task_id, TaskStatus::MatchingFailed, &e.to_string()).await;
                return Ok(());
            }
        };
        if candidates.is_empty() {
            self.settle(task_id, TaskStatus::NoMatchFound, "no candidates discovered").await;
            return Ok(());
        }

        let healthy = filter_healthy(
            candidates,
            self.prober.as_ref(),
            self.processor_store.as_ref(),
            self.config.health_check_timeout(),
        )
        .await;
        if healthy.is_empty() {
            self.settle(task_id, TaskStatus::NoMatchFound, "no healthy candidates").await;
            return Ok(());
        }

        let ranked = match evaluate_and_rank(
            &spec,
            healthy.clone(),
            self.lm.as_ref(),
            &self.config.embedding_model,
            &self.config.reasoning_model,
            self.config.default_max_candidates,
        )
        .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                self.settle(task_id, TaskStatus::MatchingFailed, &e.to_string()).await;
                return Ok(());
            }
        };

        let plan = if spec.is_complex && !self.config.disable_multi_step_workflow {
            synthesize_workflow(task_id, &spec, &healthy, self.lm.as_ref(), &self.config.workflow_model).await
        } else {
            None
        };

        let submission = match plan {
            Some(plan) => {
                let plan_json = serde_json::to_value(&plan).map_err(|e| {
                    AgentBusError::Storage(format!("failed to serialise workflow plan: {e}"))
                })?;
                let workflow_plan_uri = self
                    .blob
                    .store_json(&format!("workflow-plans/{task_id}.json"), &plan_json)
                    .await?;
                self.task_store.set_workflow_plan_uri(task_id, &workflow_plan_uri).await?;
                CandidateSubmission::WorkflowPlan {
                    task_id: task_id.to_string(),
                    workflow_plan_uri,
                }
            }
            None => {
                let candidate_processor_ids = ranked.iter().map(|c| c.processor_id.clone()).collect();
                let candidate_prices = ranked.iter().map(|c| c.score.price_quote).collect();
                CandidateSubmission::CandidateList {
                    task_id: task_id.to_string(),
                    candidate_processor_ids,
                    candidate_prices,
                }
            }
        };

        // Backend submission failure is retryable and does not alter task
        // status (spec §4.8): propagate so the worker retries on redelivery.
        if let Err(e) = self.backend.update_task_candidates(&submission).await {
            emit_event(
                tracing::Level::WARN,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.backend_submission_failed", "matching_service")
                    .with_task(task_id)
                    .with_detail(&e.to_string()),
            );
            return Err(e);
        }

        self.task_store.update_status(task_id, TaskStatus::PendingConfirmation).await?;
        self.cache
            .set_status(task_id, CachedStatus::new(TaskStatus::PendingConfirmation))
            .await?;

        emit_event(
            tracing::Level::INFO,
            ProcessKind::MatchingWorker,
            ObservabilityEvent::new("matching.settled", "matching_service")
                .with_task(task_id)
                .with_status("PendingConfirmation"),
        );

        Ok(())
    }

    /// Writes the durable and cache status together, logging (never
    /// failing the caller) on a write error — the classification itself
    /// (`NoMatchFound` vs `MatchingFailed`) has already been decided by the
    /// call site (spec §4.8 "Classification of errors").
    async fn settle(&self, task_id: &str, status: TaskStatus, error: &str) {
        if let Err(e) = self.task_store.update_status(task_id, status).await {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.settle_write_failed", "matching_service")
                    .with_task(task_id)
                    .with_detail(&e.to_string()),
            );
        }
        let _ = self
            .task_store
            .set_error(task_id, error)
            .await;
        if let Err(e) = self.cache.set_status(task_id, CachedStatus::with_error(status, error)).await {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.settle_write_failed", "matching_service")
                    .with_task(task_id)
                    .with_detail(&e.to_string()),
            );
        }
        emit_event(
            tracing::Level::WARN,
            ProcessKind::MatchingWorker,
            ObservabilityEvent::new("matching.settled_failure", "matching_service")
                .with_task(task_id)
                .with_status(&format!("{status:?}"))
                .with_detail(error),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_ports::{
        ChatResponse, MemoryCache, MemoryProcessorStore, MemoryTaskStore, MockBackendContract,
    };
    use agentbus_types::{Pricing, PricingModel, Processor, ProcessorStatus, Task};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StubLm;
    #[async_trait]
    impl LanguageModel for StubLm {
        async fn chat(&self, _request: agentbus_ports::ChatRequest) -> Result<ChatResponse, AgentBusError> {
            Ok(ChatResponse {
                text: None,
                tool_calls: vec![],
            })
        }
        async fn embed_batch(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
            Err(AgentBusError::LanguageModel("no embeddings in tests".into()))
        }
    }

    struct AlwaysHealthyProber;
    #[async_trait]
    impl HttpProber for AlwaysHealthyProber {
        async fn probe(&self, _url: &str, _timeout: Duration) -> Result<bool, AgentBusError> {
            Ok(true)
        }
    }

    fn processor(id: &str) -> Processor {
        Processor {
            processor_id: id.into(),
            name: id.into(),
            description: format!("processor {id}"),
            capability_tags: ["pdf".to_string()].into(),
            input_schema: None,
            output_schema: None,
            endpoint_url: "https://example.com".into(),
            status: ProcessorStatus::Active,
            reputation_score: 4.0,
            completed_tasks: 0,
            success_rate: 0.9,
            average_execution_time_ms: 1000.0,
            pricing: Pricing {
                model: PricingModel::Flat,
                price: 2.0,
                unit: "task".into(),
            },
            last_checked_at: None,
        }
    }

    fn config() -> Arc<AppConfig> {
        std::env::set_var("LLM_PROVIDER", "custom");
        std::env::set_var("CUSTOM_LLM_BASE_URL", "http://localhost:0");
        Arc::new(AppConfig::from_env().unwrap())
    }

    async fn service(blob_root: std::path::PathBuf, processors: &[Processor]) -> (MatchingService, Arc<dyn TaskStore>) {
        let task_store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let processor_store = MemoryProcessorStore::new();
        for p in processors {
            processor_store.upsert(p.clone()).await;
        }
        let processor_store: Arc<dyn ProcessorStore> = Arc::new(processor_store);
        let cache = Arc::new(TaskStateManager::new(Arc::new(MemoryCache::new()), Duration::from_secs(60)));
        let blob: Arc<dyn BlobStore> = Arc::new(agentbus_ports::FilesystemBlobStore::new(blob_root));
        let backend: Arc<dyn BackendContract> = Arc::new(MockBackendContract);
        let service = MatchingService::new(
            task_store.clone(),
            processor_store,
            cache,
            blob,
            None,
            Arc::new(StubLm),
            Arc::new(AlwaysHealthyProber),
            backend,
            config(),
        );
        (service, task_store)
    }

    async fn seed_task(task_store: &Arc<dyn TaskStore>, service: &MatchingService, tags: &[&str]) -> String {
        let spec = TaskSpecification {
            description: "summarise a PDF".into(),
            inputs: Default::default(),
            outputs: Default::default(),
            constraints: None,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            is_complex: false,
        };
        let spec_json = serde_json::to_value(&spec).unwrap();
        let uri = service.blob.store_json("task-specs/t1.json", &spec_json).await.unwrap();
        let mut task = Task::new("t1", "u1", &uri);
        task.status = TaskStatus::PendingMatch;
        task_store.create_task(task).await.unwrap();
        "t1".to_string()
    }

    #[tokio::test]
    async fn matching_with_no_candidates_settles_no_match_found() {
        let dir = tempdir().unwrap();
        let (service, task_store) = service(dir.path().to_path_buf(), &[]).await;
        let task_id = seed_task(&task_store, &service, &["pdf"]).await;

        service.handle_task_pending_match(&task_id).await.unwrap();

        let task = task_store.get_task_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::NoMatchFound);
    }

    #[tokio::test]
    async fn matching_with_a_healthy_candidate_settles_pending_confirmation() {
        let dir = tempdir().unwrap();
        let (service, task_store) = service(dir.path().to_path_buf(), &[processor("p1")]).await;
        let task_id = seed_task(&task_store, &service, &["pdf"]).await;

        service.handle_task_pending_match(&task_id).await.unwrap();

        let task = task_store.get_task_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::PendingConfirmation);
    }

    #[tokio::test]
    async fn already_matching_task_is_skipped_idempotently() {
        let dir = tempdir().unwrap();
        let (service, task_store) = service(dir.path().to_path_buf(), &[processor("p1")]).await;
        let task_id = seed_task(&task_store, &service, &["pdf"]).await;
        task_store.update_status(&task_id, TaskStatus::Matching).await.unwrap();

        service.handle_task_pending_match(&task_id).await.unwrap();

        let task = task_store.get_task_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Matching, "idempotent skip must not touch status");
    }

    #[tokio::test]
    async fn missing_task_marks_cached_status_failed() {
        let dir = tempdir().unwrap();
        let (service, _task_store) = service(dir.path().to_path_buf(), &[]).await;
        assert!(service.handle_task_pending_match("nonexistent").await.is_ok());

        let cached = service.cache.get_status("nonexistent").await.unwrap().unwrap();
        assert_eq!(cached.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn task_outside_matching_eligible_statuses_settles_failed_not_matching_failed() {
        let dir = tempdir().unwrap();
        let (service, task_store) = service(dir.path().to_path_buf(), &[processor("p1")]).await;
        let task_id = seed_task(&task_store, &service, &["pdf"]).await;
        task_store.update_status(&task_id, TaskStatus::Rejected).await.unwrap();

        service.handle_task_pending_match(&task_id).await.unwrap();

        let task = task_store.get_task_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(
            task.status,
            TaskStatus::Failed,
            "an unexpected pre-flight status must settle to the terminal Failed, not the retry-eligible MatchingFailed"
        );
        let cached = service.cache.get_status(&task_id).await.unwrap().unwrap();
        assert_eq!(cached.status, TaskStatus::Failed);
    }
}

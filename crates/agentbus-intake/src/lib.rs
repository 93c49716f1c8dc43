//! Intake service (spec §4.7, C7): wires the dialogue engine to the
//! backend contract, the spec formatter, the blob store and the event
//! publisher to turn a completed clarification into a durable, matchable
//! task.

use std::sync::Arc;

use agentbus_core::{format_spec, DialogueEngine, EventPublisher, InitialRequest, TaskStateManager};
use agentbus_observability::{emit_event, ObservabilityEvent, ProcessKind};
use agentbus_ports::BackendContract;
use agentbus_types::{AgentBusError, CachedStatus, DialogueStage, DialogueState, ExtractedParams, Task, TaskStatus};
use agentbus_ports::{BlobStore, TaskStore};

/// Orchestrates `startDialogue`/`continueDialogue` plus the seven-step
/// finalisation pipeline that runs once a dialogue reaches `COMPLETED`
/// (spec §4.7).
pub struct IntakeService {
    dialogue: Arc<DialogueEngine>,
    state: Arc<TaskStateManager>,
    task_store: Arc<dyn TaskStore>,
    blob: Arc<dyn BlobStore>,
    events: Arc<EventPublisher>,
    backend: Arc<dyn BackendContract>,
}

impl IntakeService {
    pub fn new(
        dialogue: Arc<DialogueEngine>,
        state: Arc<TaskStateManager>,
        task_store: Arc<dyn TaskStore>,
        blob: Arc<dyn BlobStore>,
        events: Arc<EventPublisher>,
        backend: Arc<dyn BackendContract>,
    ) -> Self {
        Self {
            dialogue,
            state,
            task_store,
            blob,
            events,
            backend,
        }
    }

    /// `initiateTaskClarification(request) -> DialogueState` (spec §4.7
    /// step 1): a thin pass-through to `DialogueEngine::startDialogue`.
    pub async fn initiate_task_clarification(
        &self,
        request: InitialRequest,
    ) -> Result<DialogueState, AgentBusError> {
        self.dialogue.start_dialogue(request).await
    }

    /// `continueClarification(dialogueId, userResponse) -> DialogueState`
    /// (spec §4.7). Finalisation runs in the background once the dialogue
    /// reaches `COMPLETED` so the caller never waits on registration (spec
    /// §4.7: "finalisation runs asynchronously w.r.t. the HTTP response
    /// that carries the COMPLETED stage").
    pub async fn continue_clarification(
        self: &Arc<Self>,
        dialogue_id: &str,
        user_response: &str,
    ) -> Result<DialogueState, AgentBusError> {
        let state = self.dialogue.process_user_response(dialogue_id, user_response).await?;

        if state.stage == DialogueStage::Completed {
            let this = Arc::clone(self);
            let dialogue_id = state.dialogue_id.clone();
            let requester_id = state.requester_id.clone();
            let params = state.extracted_params.clone();
            tokio::spawn(async move {
                if let Err(e) = this.finalize(&dialogue_id, &requester_id, &params).await {
                    emit_event(
                        tracing::Level::ERROR,
                        ProcessKind::Server,
                        ObservabilityEvent::new("intake.finalisation_failed", "intake_service")
                            .with_dialogue(&dialogue_id)
                            .with_detail(&e.to_string()),
                    );
                }
            });
        }

        Ok(state)
    }

    /// The seven-step finalisation pipeline (spec §4.7): format the spec,
    /// store it as a blob, register the task with the backend contract,
    /// create the durable row, link the cache, and publish the
    /// `TaskPendingMatch` event. No step rolls back a prior one on later
    /// failure (spec §4.7 "No compensation/rollback across steps"); any
    /// failure after step 2 leaves a `RegistrationFailed` status for
    /// whichever id is resolvable at that point.
    async fn finalize(
        &self,
        dialogue_id: &str,
        requester_id: &str,
        params: &ExtractedParams,
    ) -> Result<(), AgentBusError> {
        // Step 1: formatSpec(extractedParams) -> TaskSpecification.
        let spec = match format_spec(params) {
            Ok(spec) => spec,
            Err(e) => {
                self.mark_registration_failed(dialogue_id, &e.to_string()).await;
                return Err(e);
            }
        };

        // Step 2: cached status moves to PENDING_REGISTRATION while the
        // backend call is in flight.
        self.state
            .set_status(dialogue_id, CachedStatus::new(TaskStatus::PendingRegistration))
            .await?;

        // Step 3: persist the specification to the blob store and obtain
        // its URI (spec §6.3 "Blob paths").
        let spec_json = serde_json::to_value(&spec)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise specification: {e}")))?;
        let path_hint = format!("task-specs/{dialogue_id}.json");
        let specification_uri = match self.blob.store_json(&path_hint, &spec_json).await {
            Ok(uri) => uri,
            Err(e) => {
                self.mark_registration_failed(dialogue_id, &e.to_string()).await;
                return Err(e);
            }
        };

        // Step 4: createTaskOnContract({requester, specificationUri}) ->
        // (finalTaskId, success, error?).
        let final_task_id = match self
            .backend
            .create_task_on_contract(requester_id, &specification_uri)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.mark_registration_failed(dialogue_id, &e.to_string()).await;
                return Err(e);
            }
        };

        // Step 5: create the durable task record (durable write precedes
        // the cache write, spec §9 "Write order").
        let task = Task::new(&final_task_id, requester_id, &specification_uri);
        if let Err(e) = self.task_store.create_task(task).await {
            self.mark_registration_failed(dialogue_id, &e.to_string()).await;
            return Err(e);
        }

        // Step 6: link dialogueId -> finalTaskId in the cache, both
        // entries landing at PENDING_REGISTRATION (spec §4.2 "Linking").
        self.state
            .link(dialogue_id, &final_task_id, TaskStatus::PendingRegistration)
            .await?;

        // Durable transition to PENDING_MATCH, then the cache entry is
        // refreshed to match (spec §3 lifecycle: Clarified ->
        // PendingRegistration -> PendingMatch).
        if let Err(e) = self.task_store.update_status(&final_task_id, TaskStatus::PendingMatch).await {
            self.mark_registration_failed(dialogue_id, &e.to_string()).await;
            return Err(e);
        }
        self.state
            .set_status(&final_task_id, CachedStatus::new(TaskStatus::PendingMatch))
            .await?;

        // Step 7: publish TaskPendingMatch so the matching worker can pick
        // the task up (spec §4.6).
        self.events
            .publish_task_pending_match(&final_task_id, &specification_uri, requester_id)
            .await?;

        emit_event(
            tracing::Level::INFO,
            ProcessKind::Server,
            ObservabilityEvent::new("intake.finalised", "intake_service")
                .with_dialogue(dialogue_id)
                .with_task(&final_task_id),
        );

        Ok(())
    }

    async fn mark_registration_failed(&self, id: &str, error: &str) {
        let _ = self
            .state
            .set_status(id, CachedStatus::with_error(TaskStatus::RegistrationFailed, error))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_core::TaskStateManager;
    use agentbus_ports::{
        ChatResponse, InMemoryQueue, LanguageModel, MemoryCache, MemoryTaskStore, MockBackendContract,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StaticLm;

    #[async_trait]
    impl LanguageModel for StaticLm {
        async fn chat(&self, _request: agentbus_ports::ChatRequest) -> Result<ChatResponse, AgentBusError> {
            Ok(ChatResponse {
                text: Some("Got it, thanks!".into()),
                tool_calls: vec![],
            })
        }

        async fn embed_batch(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
            Ok(vec![])
        }
    }

    fn test_config() -> agentbus_ports::AppConfig {
        std::env::set_var("LLM_PROVIDER", "custom");
        std::env::set_var("CUSTOM_LLM_BASE_URL", "http://localhost:0");
        let mut config = agentbus_ports::AppConfig::from_env().unwrap();
        config.max_clarification_turns = 10;
        config
    }

    fn service(blob_root: std::path::PathBuf) -> Arc<IntakeService> {
        let cache = Arc::new(MemoryCache::new());
        let state = Arc::new(TaskStateManager::new(cache, Duration::from_secs(60)));
        let dialogue = Arc::new(DialogueEngine::new(
            state.clone(),
            Arc::new(StaticLm),
            Arc::new(test_config()),
        ));
        let task_store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let blob: Arc<dyn BlobStore> = Arc::new(agentbus_ports::FilesystemBlobStore::new(blob_root));
        let (queue, _receiver) = InMemoryQueue::new();
        let events = Arc::new(EventPublisher::new(Arc::new(queue), "task-pending-match"));
        let backend: Arc<dyn BackendContract> = Arc::new(MockBackendContract);
        Arc::new(IntakeService::new(dialogue, state, task_store, blob, events, backend))
    }

    #[tokio::test]
    async fn completed_dialogue_finalises_into_a_pending_match_task() {
        let dir = tempdir().unwrap();
        let service = service(dir.path().to_path_buf());

        let mut state = service
            .initiate_task_clarification(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a landing page".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        service.state.save_dialogue(&state).await.unwrap();

        state.stage = DialogueStage::Finalizing;
        service.state.save_dialogue(&state).await.unwrap();

        let completed = service
            .continue_clarification(&state.dialogue_id, "sounds great")
            .await
            .unwrap();
        assert_eq!(completed.stage, DialogueStage::Completed);

        // Finalisation is fired via tokio::spawn; yield until it lands.
        for _ in 0..50 {
            if let Some(status) = service.state.get_status(&completed.dialogue_id).await.unwrap() {
                if status.status == TaskStatus::PendingMatch {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("finalisation did not reach PendingMatch in time");
    }

    #[tokio::test]
    async fn non_terminal_continuation_does_not_spawn_finalisation() {
        let dir = tempdir().unwrap();
        let service = service(dir.path().to_path_buf());
        let state = service
            .initiate_task_clarification(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a thing".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        service.state.save_dialogue(&state).await.unwrap();

        let next = service
            .continue_clarification(&state.dialogue_id, "competitors are Acme")
            .await
            .unwrap();
        assert_ne!(next.stage, DialogueStage::Completed);
    }
}

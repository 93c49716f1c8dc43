//! HTTP surface and queue-driven matching worker for the Agent Bus (spec
//! §6.1, §5 "Scheduling model": "a request-driven network service plus a
//! queue-driven worker"). Wires every capability port to its in-process
//! reference adapter so the whole workspace runs with zero external
//! infrastructure; any real backend is a drop-in trait implementation
//! passed to [`AppState::build`] instead.

use std::sync::Arc;

use agentbus_broker::MessageBroker;
use agentbus_core::{DialogueEngine, EventPublisher, TaskStateManager};
use agentbus_intake::IntakeService;
use agentbus_matching::MatchingService;
use agentbus_observability::{emit_event, ObservabilityEvent, ProcessKind};
use agentbus_ports::{
    build_language_model, AppConfig, BackendContract, FilesystemBlobStore, HttpBackendContract,
    InMemoryQueue, MemoryCache, MemoryProcessorStore, MemoryTaskStore, MemoryVectorIndex,
    MockBackendContract, ReqwestHttpProber, TaskStore,
};

mod http;

pub use http::serve;

/// Everything a request handler or the matching worker needs, cloned
/// cheaply per request (every field is an `Arc`) the way the teacher's
/// `AppState` does for `tandem-server`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub dialogue: Arc<DialogueEngine>,
    pub intake: Arc<IntakeService>,
    pub broker: Arc<MessageBroker>,
    pub task_state: Arc<TaskStateManager>,
    pub task_store: Arc<dyn TaskStore>,
    pub matching: Arc<MatchingService>,
}

impl AppState {
    /// Builds the full dependency graph from `config`, wiring a real
    /// `HttpBackendContract` when `BACKEND_URL` is set and the
    /// mock-success path otherwise (spec §6.4). Returns the state plus the
    /// event-queue receiver the matching worker loop consumes.
    pub fn build(config: AppConfig) -> (Self, agentbus_ports::InMemoryQueueReceiver) {
        let config = Arc::new(config);

        let cache = Arc::new(MemoryCache::new());
        let task_state = Arc::new(TaskStateManager::new(cache, config.cache_ttl()));

        let task_store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let processor_store = Arc::new(MemoryProcessorStore::new());
        let vector_index = Arc::new(MemoryVectorIndex::new());
        let blob: Arc<dyn agentbus_ports::BlobStore> =
            Arc::new(FilesystemBlobStore::new(config.blob_store_root.clone()));

        let (event_queue, event_receiver) = InMemoryQueue::new();
        let event_queue = Arc::new(event_queue);
        let (broker_queue, broker_receiver) = InMemoryQueue::new();
        // External delivery of BrokerQueueMessage is out of scope (spec §1
        // "Non-goals"); this sink only keeps the channel open so
        // MessageBroker::send_message_to_* never sees a closed receiver.
        tokio::spawn(drain_broker_relay(broker_receiver));

        let lm = build_language_model(&config);
        let prober = Arc::new(ReqwestHttpProber::new());

        let backend: Arc<dyn BackendContract> = match &config.backend_url {
            Some(url) => Arc::new(HttpBackendContract::new(url.clone(), config.backend_api_key.clone())),
            None => Arc::new(MockBackendContract),
        };

        let dialogue = Arc::new(DialogueEngine::new(task_state.clone(), lm.clone(), config.clone()));
        let events = Arc::new(EventPublisher::new(event_queue, config.task_event_topic.clone()));
        let intake = Arc::new(IntakeService::new(
            dialogue.clone(),
            task_state.clone(),
            task_store.clone(),
            blob.clone(),
            events,
            backend.clone(),
        ));
        let broker = Arc::new(MessageBroker::new(
            task_store.clone(),
            Arc::new(broker_queue),
            config.message_queue_topic.clone(),
        ));
        let matching = Arc::new(MatchingService::new(
            task_store.clone(),
            processor_store,
            task_state.clone(),
            blob,
            Some(vector_index),
            lm,
            prober,
            backend,
            config.clone(),
        ));

        (
            Self {
                config,
                dialogue,
                intake,
                broker,
                task_state,
                task_store,
                matching,
            },
            event_receiver,
        )
    }
}

async fn drain_broker_relay(mut receiver: agentbus_ports::InMemoryQueueReceiver) {
    while let Some((topic, payload)) = receiver.receiver.recv().await {
        tracing::debug!(%topic, %payload, "broker message handed off for external delivery");
    }
}

/// Drains `task-pending-match` events and drives [`MatchingService`] one
/// delivery at a time (spec §5 "Scheduling model": the queue side is a
/// single-consumer worker; spec §4.8 relies on that for status-transition
/// linearisability).
pub async fn run_matching_worker(
    matching: Arc<MatchingService>,
    topic: String,
    mut receiver: agentbus_ports::InMemoryQueueReceiver,
) {
    while let Some((delivered_topic, payload)) = receiver.receiver.recv().await {
        if delivered_topic != topic {
            continue;
        }
        let Some(task_id) = payload.get("taskId").and_then(serde_json::Value::as_str) else {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.malformed_event", "matching_worker")
                    .with_detail("TaskPendingMatch payload missing taskId"),
            );
            continue;
        };
        if let Err(e) = matching.handle_task_pending_match(task_id).await {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::MatchingWorker,
                ObservabilityEvent::new("matching.worker_iteration_failed", "matching_worker")
                    .with_task(task_id)
                    .with_detail(&e.to_string()),
            );
        }
    }
}


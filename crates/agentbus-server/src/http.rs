use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agentbus_core::InitialRequest;
use agentbus_types::{AgentBusError, SenderRole, TaskPendingMatchEvent};

use crate::AppState;

/// Wraps [`AgentBusError`] so it can be returned directly from a handler
/// via `?`; the single `IntoResponse` impl below is the one error-mapping
/// extractor the HTTP boundary carries (spec §7 "Propagation policy").
struct ApiError(AgentBusError);

impl From<AgentBusError> for ApiError {
    fn from(err: AgentBusError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status().0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "error": {
                "name": self.0.name(),
                "message": self.0.to_string(),
            }
        });
        // context is included only in development (spec §7).
        if cfg!(debug_assertions) {
            body["error"]["context"] = json!(format!("{:?}", self.0));
        }
        (status, Json(body)).into_response()
    }
}

fn validation(message: impl Into<String>) -> ApiError {
    ApiError(AgentBusError::Validation(message.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DialogueStartInput {
    requester_id: String,
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    budget: Option<f64>,
    #[serde(default)]
    deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DialogueContinueInput {
    user_response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageInput {
    task_id: String,
    sender_id: String,
    sender_role: SenderRole,
    content: Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// `POST /dialogue/start` (spec §6.1): `{requesterId, description(>=10),
/// tags?, budget?>0, deadline?(future)}`.
async fn dialogue_start(
    State(state): State<AppState>,
    Json(input): Json<DialogueStartInput>,
) -> Result<Json<Value>, ApiError> {
    if input.description.trim().chars().count() < 10 {
        return Err(validation("description must be at least 10 characters"));
    }
    if let Some(budget) = input.budget {
        if budget <= 0.0 {
            return Err(validation("budget must be greater than zero"));
        }
    }
    if let Some(deadline) = input.deadline {
        if deadline <= Utc::now() {
            return Err(validation("deadline must be strictly in the future"));
        }
    }

    let dialogue = state
        .intake
        .initiate_task_clarification(InitialRequest {
            requester_id: input.requester_id,
            description: input.description,
            tags: input.tags,
            budget: input.budget,
            deadline: input.deadline,
        })
        .await?;
    Ok(Json(serde_json::to_value(dialogue).map_err(AgentBusError::wrap)?))
}

/// `POST /dialogue/:id/continue` (spec §6.1): `{userResponse (>=1
/// char)}`.
async fn dialogue_continue(
    State(state): State<AppState>,
    Path(dialogue_id): Path<String>,
    Json(input): Json<DialogueContinueInput>,
) -> Result<Json<Value>, ApiError> {
    if input.user_response.is_empty() {
        return Err(validation("userResponse must be at least 1 character"));
    }
    let dialogue = state
        .intake
        .continue_clarification(&dialogue_id, &input.user_response)
        .await?;
    Ok(Json(serde_json::to_value(dialogue).map_err(AgentBusError::wrap)?))
}

/// `POST /messages` (spec §6.1): routes by `senderRole` to the matching
/// broker operation; 403/404 propagate from [`agentbus_broker`]'s
/// authorisation checks.
async fn send_message(
    State(state): State<AppState>,
    Json(input): Json<SendMessageInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match input.sender_role {
        SenderRole::Requester => {
            state
                .broker
                .send_message_to_processor(&input.task_id, &input.sender_id, input.content)
                .await?;
        }
        SenderRole::Processor => {
            state
                .broker
                .send_message_to_requester(&input.task_id, &input.sender_id, input.content)
                .await?;
        }
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "message": "message accepted" }))))
}

/// `GET /tasks/:id/status` (spec §6.1): cache first, durable store as
/// fallback (spec §9 "Readers consult cache then fall back to durable").
async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(cached) = state.task_state.get_status(&task_id).await? {
        return Ok(Json(json!({ "taskId": task_id, "status": cached.status })));
    }
    let task = state
        .task_store
        .get_task_by_id(&task_id)
        .await?
        .ok_or_else(|| AgentBusError::NotFound(format!("task '{task_id}' not found")))?;
    Ok(Json(json!({ "taskId": task.task_id, "status": task.status })))
}

/// `POST /webhooks/process-task` (spec §6.1): dispatched async — the
/// response returns 202 before matching runs, matching the background
/// finalisation pattern of C7 (spec §4.7).
async fn process_task_webhook(
    State(state): State<AppState>,
    Json(event): Json<TaskPendingMatchEvent>,
) -> StatusCode {
    let matching = state.matching.clone();
    tokio::spawn(async move {
        if let Err(e) = matching.handle_task_pending_match(&event.task_id).await {
            tracing::error!(task_id = %event.task_id, error = %e, "webhook-triggered matching run failed");
        }
    });
    StatusCode::ACCEPTED
}

fn app_router(state: AppState) -> Router {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin: HeaderValue = state
            .config
            .cors_origin
            .parse()
            .unwrap_or(HeaderValue::from_static("*"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/dialogue/start", post(dialogue_start))
        .route("/api/dialogue/{id}/continue", post(dialogue_continue))
        .route("/api/messages", post(send_message))
        .route("/api/tasks/{id}/status", get(task_status))
        .route("/api/webhooks/process-task", post(process_task_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Binds `config.bind_addr`, serves the router built by [`app_router`],
/// and drains gracefully on `SIGINT`/`SIGTERM` (spec, SPEC_FULL §6.1).
/// Also spawns the queue-driven matching worker loop so a single process
/// covers both halves of the scheduling model (spec §5).
pub async fn serve(config: agentbus_ports::AppConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let task_event_topic = config.task_event_topic.clone();
    let (state, event_receiver) = AppState::build(config);

    let worker_matching = state.matching.clone();
    let worker = tokio::spawn(crate::run_matching_worker(
        worker_matching,
        task_event_topic,
        event_receiver,
    ));

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "agentbus-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => futures::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_config() -> agentbus_ports::AppConfig {
        std::env::set_var("LLM_PROVIDER", "custom");
        std::env::set_var("CUSTOM_LLM_BASE_URL", "http://localhost:0");
        std::env::set_var("BLOB_STORE_ROOT", std::env::temp_dir().join("agentbus-http-tests").to_string_lossy().to_string());
        agentbus_ports::AppConfig::from_env().unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _receiver) = AppState::build(test_config());
        let app = app_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dialogue_start_rejects_short_description() {
        let (state, _receiver) = AppState::build(test_config());
        let app = app_router(state);
        let body = json!({ "requesterId": "u1", "description": "short" }).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/dialogue/start")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_task_status_is_404() {
        let (state, _receiver) = AppState::build(test_config());
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks/does-not-exist/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn messages_without_assigned_task_is_rejected() {
        let (state, _receiver) = AppState::build(test_config());
        let app = app_router(state);
        let body = json!({
            "taskId": "nonexistent",
            "senderId": "u1",
            "senderRole": "requester",
            "content": "hello",
        })
        .to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

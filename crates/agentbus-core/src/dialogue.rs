//! Clarification dialogue engine (spec §4.4, C4): a turn-based state
//! machine driven by a language model with two declared tools.

use std::collections::HashMap;
use std::sync::Arc;

use agentbus_observability::{emit_event, ObservabilityEvent, ProcessKind};
use agentbus_ports::{
    AppConfig, ChatMessage, ChatRequest, ChatRole, ChatToolCall, LanguageModel, ToolSchema,
};
use agentbus_types::{
    AgentBusError, DialogueStage, DialogueState, DialogueTurn, ExtractedParams, ToolCall,
    ToolResult, TurnRole,
};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::state::TaskStateManager;

const CANCEL_KEYWORDS: &[&str] = &["cancel", "stop", "abort", "nevermind", "forget it"];

/// A validated initial clarification request (spec §4.4
/// `startDialogue(initialRequest)`).
#[derive(Debug, Clone)]
pub struct InitialRequest {
    pub requester_id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub budget: Option<f64>,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
}

fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: "update_dialogue_parameters".to_string(),
            description: "Merge newly learned structured parameters into the dialogue's extracted parameter bag.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "refined_description": {"type": "string"},
                    "competitors": {"type": "array", "items": {"type": "string"}},
                    "platforms": {"type": "array", "items": {"type": "string"}},
                    "budget": {"type": "number"},
                    "timeframe": {"type": "string"},
                    "key_features": {"type": "array", "items": {"type": "string"}},
                    "target_audience": {"type": "string"},
                    "quality": {"type": "string"},
                    "is_complex_hint": {"type": "boolean"},
                },
                "additionalProperties": false,
            }),
        },
        ToolSchema {
            name: "determine_next_question_or_finalize".to_string(),
            description: "Decide which dialogue stage to move to next, or signal readiness to finalize.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "next_stage": {
                        "type": "string",
                        "enum": [
                            "GATHERING_COMPETITORS",
                            "GATHERING_TIMEFRAME",
                            "GATHERING_PLATFORMS",
                            "FINALIZING",
                        ],
                    },
                    "reasoning": {"type": "string"},
                    "is_ready_to_finalize": {"type": "boolean"},
                },
                "required": ["next_stage", "is_ready_to_finalize"],
                "additionalProperties": false,
            }),
        },
    ]
}

/// Per-dialogue advisory lock registry closing the "Concurrent dialogue
/// mutation" open question (spec §9): held only across the
/// read-modify-write of a single `process_user_response` call.
#[derive(Clone, Default)]
struct DialogueLocks {
    locks: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DialogueLocks {
    async fn acquire(&self, dialogue_id: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self.locks.lock().await;
        guard
            .entry(dialogue_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct DialogueEngine {
    state: Arc<TaskStateManager>,
    lm: Arc<dyn LanguageModel>,
    config: Arc<AppConfig>,
    locks: DialogueLocks,
}

impl DialogueEngine {
    pub fn new(state: Arc<TaskStateManager>, lm: Arc<dyn LanguageModel>, config: Arc<AppConfig>) -> Self {
        Self {
            state,
            lm,
            config,
            locks: DialogueLocks::default(),
        }
    }

    /// `startDialogue(initialRequest) -> DialogueState` (spec §4.4).
    pub async fn start_dialogue(&self, request: InitialRequest) -> Result<DialogueState, AgentBusError> {
        if request.requester_id.trim().is_empty() {
            return Err(AgentBusError::Validation("requesterId must not be empty".into()));
        }
        if request.description.trim().is_empty() {
            return Err(AgentBusError::Validation("description must not be empty".into()));
        }

        let dialogue_id = Uuid::new_v4().to_string();
        let mut extracted = ExtractedParams::default();
        extracted.initial_description = Some(request.description.clone());
        extracted.budget = request.budget.map(|b| json!(b));
        extracted.deadline = request.deadline.map(|d| json!(d));
        extracted.tags = request.tags.iter().cloned().collect();

        let seed = json!({
            "initial": { "description": request.description },
            "requester": { "requesterId": request.requester_id },
        });
        let system_prompt = agentbus_prompts::format_prompt("dialogue.system", &seed);
        let user_seed = agentbus_prompts::format_prompt("dialogue.user_seed", &seed);

        let mut state = DialogueState {
            dialogue_id: dialogue_id.clone(),
            requester_id: request.requester_id.clone(),
            history: vec![
                DialogueTurn::text(TurnRole::System, system_prompt),
                DialogueTurn::text(TurnRole::User, user_seed),
            ],
            stage: DialogueStage::GatheringCompetitors,
            extracted_params: extracted,
        };

        emit_event(
            tracing::Level::INFO,
            ProcessKind::Server,
            ObservabilityEvent::new("dialogue.started", "dialogue_engine").with_dialogue(&dialogue_id),
        );

        let result = self.generate_next_assistant_response(&mut state).await;
        self.state.save_dialogue(&state).await?;
        result?;
        Ok(state)
    }

    /// `processUserResponse(dialogueId, userResponse) -> DialogueState`
    /// (spec §4.4).
    pub async fn process_user_response(
        &self,
        dialogue_id: &str,
        user_response: &str,
    ) -> Result<DialogueState, AgentBusError> {
        let lock = self.locks.acquire(dialogue_id).await;
        let _guard = lock.lock().await;

        let mut state = self
            .state
            .get_dialogue(dialogue_id)
            .await?
            .ok_or_else(|| AgentBusError::NotFound(format!("dialogue '{dialogue_id}' not found or expired")))?;

        if state.stage.is_terminal() {
            return Err(AgentBusError::Conflict(format!(
                "dialogue '{dialogue_id}' is already in terminal stage {:?}",
                state.stage
            )));
        }

        // A further turn while FINALIZING deterministically completes the
        // dialogue without another LM round-trip (spec §8 scenario 2: the
        // dialogue "transitions to FINALIZING then (on a further turn)
        // COMPLETED").
        if state.stage == DialogueStage::Finalizing {
            state.history.push(DialogueTurn::text(TurnRole::User, user_response));
            state.stage = DialogueStage::Completed;
            let closing = agentbus_prompts::format_prompt(
                "dialogue.fallback.finalizing",
                &json!({ "params": state.extracted_params }),
            );
            state.history.push(DialogueTurn::text(TurnRole::Assistant, closing));
            self.state.save_dialogue(&state).await?;
            return Ok(state);
        }

        state.history.push(DialogueTurn::text(TurnRole::User, user_response));

        if contains_cancel_keyword(user_response) {
            state.stage = DialogueStage::Cancelled;
            self.state.save_dialogue(&state).await?;
            return Ok(state);
        }

        if state.user_turn_count() > self.config.max_clarification_turns {
            state.stage = DialogueStage::Failed;
            self.state.save_dialogue(&state).await?;
            return Ok(state);
        }

        let result = self.generate_next_assistant_response(&mut state).await;
        self.state.save_dialogue(&state).await?;
        result?;
        Ok(state)
    }

    /// Drives one LM round-trip: builds the chat request from `state`,
    /// dispatches any tool calls, and appends the resulting turn(s) (spec
    /// §4.4 "LM interaction contract").
    async fn generate_next_assistant_response(&self, state: &mut DialogueState) -> Result<(), AgentBusError> {
        let messages: Vec<ChatMessage> = state
            .history
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| {
                ChatMessage::new(
                    match t.role {
                        TurnRole::System => ChatRole::System,
                        TurnRole::User => ChatRole::User,
                        TurnRole::Assistant => ChatRole::Assistant,
                        TurnRole::Tool => ChatRole::Tool,
                    },
                    t.content.clone(),
                )
            })
            .collect();

        let request = ChatRequest {
            model: self.config.clarification_model.clone(),
            messages,
            tools: tool_schemas(),
            temperature: 0.5,
            max_tokens: 512,
        };

        let response = match self.lm.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                self.append_apology(state);
                state.stage = DialogueStage::Failed;
                emit_event(
                    tracing::Level::ERROR,
                    ProcessKind::Server,
                    ObservabilityEvent::new("dialogue.lm_error", "dialogue_engine")
                        .with_dialogue(&state.dialogue_id)
                        .with_detail(&e.to_string()),
                );
                return Err(e);
            }
        };

        if !response.tool_calls.is_empty() {
            let tool_calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect();
            state.history.push(DialogueTurn::assistant_tool_calls(tool_calls));

            let mut any_invalid = false;
            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let outcome = self.dispatch_tool_call(state, call);
                if outcome.is_err() {
                    any_invalid = true;
                }
                results.push(ToolResult {
                    call_id: call.id.clone(),
                    content: match outcome {
                        Ok(value) => value,
                        Err(msg) => json!({ "error": msg }),
                    },
                });
            }
            state.history.push(DialogueTurn::tool_results(results));

            let prose = if any_invalid {
                agentbus_prompts::get_prompt("dialogue.progress_after_invalid_tool_output")
            } else {
                self.fallback_prose(state)
            };
            state.history.push(DialogueTurn::text(TurnRole::Assistant, prose));
        } else if let Some(text) = response.text {
            state.history.push(DialogueTurn::text(TurnRole::Assistant, text));
        } else {
            // Neither tools nor text: treat as a recoverable, not fatal,
            // hiccup and nudge the requester forward deterministically.
            state
                .history
                .push(DialogueTurn::text(TurnRole::Assistant, self.fallback_prose(state)));
        }

        Ok(())
    }

    fn append_apology(&self, state: &mut DialogueState) {
        let apology = agentbus_prompts::get_prompt("dialogue.apology");
        let already_present = state
            .history
            .last()
            .map(|t| t.role == TurnRole::Assistant && t.content == apology)
            .unwrap_or(false);
        if !already_present {
            state.history.push(DialogueTurn::text(TurnRole::Assistant, apology));
        }
    }

    /// Dispatches a single declared tool call by name (spec §4.4, §9
    /// "Dynamic language-model tool-calling": "No dynamic dispatch beyond
    /// this"). Returns the JSON payload to report back as the tool
    /// result, or an error string for a shape-invalid call.
    fn dispatch_tool_call(&self, state: &mut DialogueState, call: &ChatToolCall) -> Result<Value, String> {
        match call.name.as_str() {
            "update_dialogue_parameters" => {
                let args = call
                    .arguments
                    .as_object()
                    .ok_or_else(|| "update_dialogue_parameters expects an object".to_string())?;
                merge_extracted_params(&mut state.extracted_params, args);
                Ok(json!({ "merged": true }))
            }
            "determine_next_question_or_finalize" => {
                let next_stage_raw = call
                    .arguments
                    .get("next_stage")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "determine_next_question_or_finalize requires next_stage".to_string())?;
                let next_stage = parse_stage(next_stage_raw)
                    .ok_or_else(|| format!("unknown next_stage '{next_stage_raw}'"))?;
                let is_ready = call
                    .arguments
                    .get("is_ready_to_finalize")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                state.stage = next_stage;
                if is_ready && state.stage != DialogueStage::Completed {
                    state.stage = DialogueStage::Finalizing;
                }
                Ok(json!({ "stage": next_stage_raw, "is_ready_to_finalize": is_ready }))
            }
            other => Err(format!("unknown tool '{other}'")),
        }
    }

    /// Deterministic stage-templated prose used instead of a second LM
    /// round-trip after tool dispatch (spec §4.4, §9 "Fallback after tool
    /// calls").
    fn fallback_prose(&self, state: &DialogueState) -> String {
        let template = match state.stage {
            DialogueStage::GatheringCompetitors => "dialogue.fallback.gathering_competitors",
            DialogueStage::GatheringTimeframe => "dialogue.fallback.gathering_timeframe",
            DialogueStage::GatheringPlatforms => "dialogue.fallback.gathering_platforms",
            DialogueStage::Finalizing => "dialogue.fallback.finalizing",
            DialogueStage::Completed | DialogueStage::Failed | DialogueStage::Cancelled => {
                "dialogue.fallback.finalizing"
            }
        };
        agentbus_prompts::format_prompt(template, &json!({ "params": state.extracted_params }))
    }
}

fn contains_cancel_keyword(response: &str) -> bool {
    let folded = response.to_lowercase();
    CANCEL_KEYWORDS.iter().any(|kw| folded.contains(kw))
}

fn parse_stage(raw: &str) -> Option<DialogueStage> {
    match raw {
        "GATHERING_COMPETITORS" => Some(DialogueStage::GatheringCompetitors),
        "GATHERING_TIMEFRAME" => Some(DialogueStage::GatheringTimeframe),
        "GATHERING_PLATFORMS" => Some(DialogueStage::GatheringPlatforms),
        "FINALIZING" => Some(DialogueStage::Finalizing),
        _ => None,
    }
}

fn merge_extracted_params(params: &mut ExtractedParams, args: &serde_json::Map<String, Value>) {
    if let Some(v) = args.get("refined_description").and_then(Value::as_str) {
        params.refined_description = Some(v.to_string());
    }
    if let Some(arr) = args.get("competitors").and_then(Value::as_array) {
        params.competitors = arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }
    if let Some(arr) = args.get("platforms").and_then(Value::as_array) {
        params.required_platforms = arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }
    if let Some(n) = args.get("budget").and_then(Value::as_f64) {
        params.budget = Some(json!(n));
    }
    if let Some(v) = args.get("timeframe").and_then(Value::as_str) {
        params.timeframe = Some(v.to_string());
    }
    if let Some(arr) = args.get("key_features").and_then(Value::as_array) {
        params.key_features = arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }
    if let Some(v) = args.get("target_audience").and_then(Value::as_str) {
        params.target_audience = Some(v.to_string());
    }
    if let Some(v) = args.get("quality").and_then(Value::as_str) {
        params.quality = Some(v.to_string());
    }
    if let Some(v) = args.get("is_complex_hint").and_then(Value::as_bool) {
        params.is_complex_hint = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_ports::{ChatResponse, MemoryCache};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedLm {
        responses: std::sync::Mutex<Vec<ChatResponse>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for ScriptedLm {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, AgentBusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                return Ok(ChatResponse {
                    text: Some("ok".into()),
                    tool_calls: vec![],
                });
            }
            Ok(guard.remove(0))
        }

        async fn embed_batch(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
            Ok(vec![])
        }
    }

    fn engine(lm: Arc<dyn LanguageModel>) -> DialogueEngine {
        let state = Arc::new(TaskStateManager::new(Arc::new(MemoryCache::new()), Duration::from_secs(60)));
        let mut config = test_config();
        config.max_clarification_turns = 10;
        DialogueEngine::new(state, lm, Arc::new(config))
    }

    fn test_config() -> AppConfig {
        std::env::set_var("LLM_PROVIDER", "custom");
        std::env::set_var("CUSTOM_LLM_BASE_URL", "http://localhost:0");
        AppConfig::from_env().unwrap()
    }

    #[tokio::test]
    async fn zero_user_turns_yields_one_assistant_turn() {
        let lm = Arc::new(ScriptedLm {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let engine = engine(lm);
        let state = engine
            .start_dialogue(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a landing page for my SaaS".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        assert_eq!(state.stage, DialogueStage::GatheringCompetitors);
        let assistant_turns = state.history.iter().filter(|t| t.role == TurnRole::Assistant).count();
        assert_eq!(assistant_turns, 1);
        assert_eq!(state.history.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_keyword_transitions_immediately() {
        let lm = Arc::new(ScriptedLm {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let engine = engine(lm.clone());
        let mut state = engine
            .start_dialogue(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a thing".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        engine.state.save_dialogue(&state).await.unwrap();
        let calls_before = lm.calls.load(Ordering::SeqCst);
        state = engine
            .process_user_response(&state.dialogue_id, "actually nevermind")
            .await
            .unwrap();
        assert_eq!(state.stage, DialogueStage::Cancelled);
        assert_eq!(lm.calls.load(Ordering::SeqCst), calls_before, "no LM call on cancellation");
    }

    #[tokio::test]
    async fn exceeding_max_turns_fails_without_lm_call() {
        let lm = Arc::new(ScriptedLm {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let state_mgr = Arc::new(TaskStateManager::new(Arc::new(MemoryCache::new()), Duration::from_secs(60)));
        let mut config = test_config();
        config.max_clarification_turns = 1;
        let engine = DialogueEngine::new(state_mgr, lm.clone(), Arc::new(config));

        let mut state = engine
            .start_dialogue(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a thing".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        engine.state.save_dialogue(&state).await.unwrap();
        state = engine
            .process_user_response(&state.dialogue_id, "first answer")
            .await
            .unwrap();
        engine.state.save_dialogue(&state).await.unwrap();

        let calls_before = lm.calls.load(Ordering::SeqCst);
        state = engine
            .process_user_response(&state.dialogue_id, "second answer")
            .await
            .unwrap();
        assert_eq!(state.stage, DialogueStage::Failed);
        assert_eq!(lm.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn finalizing_completes_on_the_following_turn() {
        let lm = Arc::new(ScriptedLm {
            responses: std::sync::Mutex::new(vec![ChatResponse {
                text: None,
                tool_calls: vec![ChatToolCall {
                    id: "call_1".into(),
                    name: "determine_next_question_or_finalize".into(),
                    arguments: json!({"next_stage": "FINALIZING", "is_ready_to_finalize": true}),
                }],
            }]),
            calls: AtomicUsize::new(0),
        });
        let engine = engine(lm.clone());
        let mut state = engine
            .start_dialogue(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a thing".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        engine.state.save_dialogue(&state).await.unwrap();

        state = engine
            .process_user_response(&state.dialogue_id, "competitors are Linear and Notion")
            .await
            .unwrap();
        assert_eq!(state.stage, DialogueStage::Finalizing);
        engine.state.save_dialogue(&state).await.unwrap();

        state = engine
            .process_user_response(&state.dialogue_id, "sounds good")
            .await
            .unwrap();
        assert_eq!(state.stage, DialogueStage::Completed);
    }

    #[tokio::test]
    async fn terminal_stage_rejects_further_input() {
        let lm = Arc::new(ScriptedLm {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let engine = engine(lm);
        let mut state = engine
            .start_dialogue(InitialRequest {
                requester_id: "u1".into(),
                description: "Build a thing".into(),
                tags: vec![],
                budget: None,
                deadline: None,
            })
            .await
            .unwrap();
        state.stage = DialogueStage::Failed;
        engine.state.save_dialogue(&state).await.unwrap();

        let err = engine
            .process_user_response(&state.dialogue_id, "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentBusError::Conflict(_)));
    }
}

//! `LanguageModel` adapters. Grounded in the teacher's
//! `OpenAICompatibleProvider`/`AnthropicProvider` (`tandem-providers`),
//! generalised with a non-streaming `chat` call that accepts declared
//! tools and returns structured tool calls, plus an embeddings endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use agentbus_types::AgentBusError;

use crate::config::{AppConfig, LlmProvider};
use crate::traits::{ChatRequest, ChatResponse, ChatRole, ChatToolCall, LanguageModel};

const EMBED_BATCH_CHUNK: usize = 512;
const RETRY_ATTEMPTS: u32 = 2;

/// OpenAI-compatible chat-completions + embeddings client (also used for
/// `LLM_PROVIDER=custom` against an OpenAI-compatible base URL).
pub struct OpenAiCompatibleLanguageModel {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleLanguageModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleLanguageModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentBusError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };
                let mut entry = json!({ "role": role, "content": m.content });
                if let Some(id) = &m.tool_call_id {
                    entry["tool_call_id"] = json!(id);
                }
                entry
            })
            .collect();

        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        let value = self.post_with_retry(&url, &body).await?;
        parse_openai_chat_response(&value)
    }

    async fn embed_batch(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_CHUNK) {
            let body = json!({ "model": model, "input": chunk });
            let value = self.post_with_retry(&url, &body).await?;
            let data = value
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| AgentBusError::LanguageModel("embeddings response missing 'data'".into()))?;
            for item in data {
                let embedding = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .ok_or_else(|| AgentBusError::LanguageModel("embedding item missing 'embedding'".into()))?
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect();
                out.push(embedding);
            }
        }
        Ok(out)
    }
}

impl OpenAiCompatibleLanguageModel {
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value, AgentBusError> {
        let mut attempt = 0;
        loop {
            let mut req = self.client.post(url).json(body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let value: Value = response.json().await.unwrap_or(Value::Null);
                    if status.is_success() {
                        return Ok(value);
                    }
                    if attempt >= RETRY_ATTEMPTS {
                        return Err(AgentBusError::LanguageModel(format!(
                            "provider request failed with status {status}: {value}"
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= RETRY_ATTEMPTS {
                        return Err(AgentBusError::LanguageModel(format!(
                            "provider transport error: {e}"
                        )));
                    }
                }
            }
            let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

fn parse_openai_chat_response(value: &Value) -> Result<ChatResponse, AgentBusError> {
    let message = value
        .pointer("/choices/0/message")
        .ok_or_else(|| AgentBusError::LanguageModel(format!("malformed chat response: {value}")))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id")?.as_str()?.to_string();
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let raw_args = function.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: Value = serde_json::from_str(raw_args).unwrap_or(Value::Null);
                    Some(ChatToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse { text, tool_calls })
}

/// Anthropic Messages API client. Tool calls arrive as `content` blocks of
/// type `tool_use`; text arrives as `text` blocks — grounded in the
/// teacher's `AnthropicProvider`.
pub struct AnthropicLanguageModel {
    api_key: String,
    client: Client,
}

impl AnthropicLanguageModel {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicLanguageModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentBusError> {
        let mut system_prompt = String::new();
        let mut messages = Vec::new();
        for m in &request.messages {
            match m.role {
                ChatRole::System => {
                    if !system_prompt.is_empty() {
                        system_prompt.push('\n');
                    }
                    system_prompt.push_str(&m.content);
                }
                ChatRole::User => messages.push(json!({ "role": "user", "content": m.content })),
                ChatRole::Assistant => {
                    messages.push(json!({ "role": "assistant", "content": m.content }))
                }
                ChatRole::Tool => messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    }]
                })),
            }
        }

        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "system": system_prompt,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("anthropic-version", "2023-06-01")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentBusError::LanguageModel(format!("anthropic transport error: {e}")))?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| AgentBusError::LanguageModel(format!("anthropic decode error: {e}")))?;
        if !status.is_success() {
            return Err(AgentBusError::LanguageModel(format!(
                "anthropic request failed with status {status}: {value}"
            )));
        }

        let blocks = value
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let arguments = block.get("input").cloned().unwrap_or(Value::Null);
                    tool_calls.push(ChatToolCall { id, name, arguments });
                }
                _ => {}
            }
        }

        Ok(ChatResponse {
            text: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }

    async fn embed_batch(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
        // Anthropic does not expose an embeddings endpoint; callers
        // configured with LLM_PROVIDER=anthropic must rely on the tag-only
        // discovery branch (spec §4.8.1: "semantic branch is skipped
        // silently if either the embedder or the vector index is
        // unavailable").
        Err(AgentBusError::LanguageModel(
            "anthropic provider does not support embeddings".into(),
        ))
    }
}

/// Builds the configured `LanguageModel` from `AppConfig` (spec §6.4
/// `LLM_PROVIDER`).
pub fn build_language_model(config: &AppConfig) -> std::sync::Arc<dyn LanguageModel> {
    match config.llm_provider {
        LlmProvider::OpenAi => std::sync::Arc::new(OpenAiCompatibleLanguageModel::new(
            "https://api.openai.com/v1",
            config.openai_api_key.clone(),
        )),
        LlmProvider::Anthropic => std::sync::Arc::new(AnthropicLanguageModel::new(
            config.anthropic_api_key.clone().unwrap_or_default(),
        )),
        LlmProvider::Custom => std::sync::Arc::new(OpenAiCompatibleLanguageModel::new(
            config
                .custom_llm_base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:8080/v1".to_string()),
            config.custom_llm_api_key.clone(),
        )),
    }
}

use std::env;
use std::time::Duration;

/// Which LM provider backs the chat/tool-use and embedding calls (spec
/// §6.4 `LLM_PROVIDER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Custom,
}

impl LlmProvider {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "anthropic" => LlmProvider::Anthropic,
            "custom" => LlmProvider::Custom,
            _ => LlmProvider::OpenAi,
        }
    }
}

/// Env-var driven configuration (spec §6.4). A single "env" layer, unlike
/// the teacher's layered project/global/managed `ConfigStore` — this
/// service has no per-workspace project directory to layer on top of.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub llm_provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub custom_llm_base_url: Option<String>,
    pub custom_llm_api_key: Option<String>,
    pub clarification_model: String,
    pub embedding_model: String,
    pub reasoning_model: String,
    pub workflow_model: String,
    pub disable_processor_filtering: bool,
    pub disable_multi_step_workflow: bool,
    pub health_check_timeout_ms: u64,
    pub default_max_candidates: usize,
    pub cache_ttl_seconds: u64,
    pub task_event_topic: String,
    pub message_queue_topic: String,
    pub vector_index_url: Option<String>,
    pub blob_store_root: String,
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub max_clarification_turns: usize,
    pub bind_addr: String,
    pub cors_origin: String,
}

impl AppConfig {
    /// Reads the recognised keys from the process environment (spec
    /// §6.4). Unset keys fall back to documented defaults; no key is
    /// required except whichever LM provider key `LLM_PROVIDER` gates.
    pub fn from_env() -> anyhow::Result<Self> {
        let llm_provider = LlmProvider::parse(&env::var("LLM_PROVIDER").unwrap_or_default());
        let config = Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            llm_provider,
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            custom_llm_base_url: env::var("CUSTOM_LLM_BASE_URL").ok(),
            custom_llm_api_key: env::var("CUSTOM_LLM_API_KEY").ok(),
            clarification_model: env::var("CLARIFICATION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            reasoning_model: env::var("REASONING_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            workflow_model: env::var("WORKFLOW_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            disable_processor_filtering: parse_bool_env("DISABLE_PROCESSOR_FILTERING"),
            disable_multi_step_workflow: parse_bool_env("DISABLE_MULTI_STEP_WORKFLOW"),
            health_check_timeout_ms: env::var("HEALTH_CHECK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            default_max_candidates: env::var("DEFAULT_MAX_CANDIDATES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            cache_ttl_seconds: env::var("REDIS_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            task_event_topic: env::var("TASK_EVENT_TOPIC")
                .unwrap_or_else(|_| "task-pending-match".to_string()),
            message_queue_topic: env::var("MESSAGE_QUEUE_TOPIC")
                .unwrap_or_else(|_| "broker-messages".to_string()),
            vector_index_url: env::var("VECTOR_INDEX_URL").ok(),
            blob_store_root: env::var("BLOB_STORE_ROOT")
                .unwrap_or_else(|_| "./agentbus-blobs".to_string()),
            backend_url: env::var("BACKEND_URL").ok(),
            backend_api_key: env::var("BACKEND_API_KEY").ok(),
            max_clarification_turns: env::var("MAX_CLARIFICATION_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".to_string()),
            cors_origin: env::var("AGENTBUS_CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        };

        match config.llm_provider {
            LlmProvider::OpenAi if config.openai_api_key.is_none() => {
                tracing::warn!("LLM_PROVIDER=openai but OPENAI_API_KEY is unset; LM calls will fail at invocation time");
            }
            LlmProvider::Anthropic if config.anthropic_api_key.is_none() => {
                tracing::warn!("LLM_PROVIDER=anthropic but ANTHROPIC_API_KEY is unset; LM calls will fail at invocation time");
            }
            LlmProvider::Custom if config.custom_llm_base_url.is_none() => {
                tracing::warn!("LLM_PROVIDER=custom but CUSTOM_LLM_BASE_URL is unset; LM calls will fail at invocation time");
            }
            _ => {}
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

fn parse_bool_env(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

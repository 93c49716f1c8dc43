use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which half of the service emitted an event — the request-driven HTTP
/// surface or the queue-driven matching worker (spec §5 "Scheduling
/// model": "a request-driven network service plus a queue-driven worker").
#[derive(Debug, Clone, Copy)]
pub enum ProcessKind {
    Server,
    MatchingWorker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::MatchingWorker => "matching-worker",
        }
    }
}

/// A structured, component-tagged log event (grounded in the teacher's
/// `ObservabilityEvent`, generalised with Agent Bus correlation fields).
#[derive(Debug, Clone)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub task_id: Option<&'a str>,
    pub dialogue_id: Option<&'a str>,
    pub processor_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

impl<'a> ObservabilityEvent<'a> {
    pub fn new(event: &'a str, component: &'a str) -> Self {
        Self {
            event,
            component,
            task_id: None,
            dialogue_id: None,
            processor_id: None,
            status: None,
            error_code: None,
            detail: None,
        }
    }

    pub fn with_task(mut self, task_id: &'a str) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_dialogue(mut self, dialogue_id: &'a str) -> Self {
        self.dialogue_id = Some(dialogue_id);
        self
    }

    pub fn with_processor(mut self, processor_id: &'a str) -> Self {
        self.processor_id = Some(processor_id);
        self
    }

    pub fn with_status(mut self, status: &'a str) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error_code(mut self, error_code: &'a str) -> Self {
        self.error_code = Some(error_code);
        self
    }

    pub fn with_detail(mut self, detail: &'a str) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Emits a single structured event at the given level and process. Every
/// component in the workspace goes through this instead of ad-hoc
/// `tracing::info!` calls so log shape stays uniform.
pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! emit_at {
        ($macro:ident) => {
            tracing::$macro!(
                target: "agentbus.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                task_id = event.task_id.unwrap_or(""),
                dialogue_id = event.dialogue_id.unwrap_or(""),
                processor_id = event.processor_id.unwrap_or(""),
                status = event.status.unwrap_or(""),
                error_code = event.error_code.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "observability_event"
            )
        };
    }

    match level {
        Level::ERROR => emit_at!(error),
        Level::WARN => emit_at!(warn),
        Level::DEBUG => emit_at!(debug),
        Level::TRACE => emit_at!(trace),
        Level::INFO => emit_at!(info),
    }
}

/// Masks a value for logging, keeping only its length and a short hash —
/// grounded in the teacher's `redact_text` (used so dialogue text and
/// secrets never land in logs verbatim).
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} sha={}]", trimmed.len(), short_hash(trimmed))
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Initialises the global `tracing` subscriber: a compact console layer
/// filtered by `RUST_LOG` (falling back to the Agent Bus `LOG_LEVEL`
/// configuration key, spec §6.4, and finally `"info"`). Idempotent — safe
/// to call from multiple binaries/tests in the same process tree.
pub fn init_logging(log_level_fallback: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level_fallback.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();

    Ok(())
}

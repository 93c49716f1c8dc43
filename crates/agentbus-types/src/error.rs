use thiserror::Error;

/// The Agent Bus error taxonomy (spec §7). Kinds, not type names: every
/// component-level error collapses into one of these before it crosses a
/// component boundary, so the HTTP layer needs exactly one mapping table.
#[derive(Debug, Error)]
pub enum AgentBusError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorisation error: {0}")]
    Authorisation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflicting state: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("no matching processor found")]
    NoMatch,

    #[error("matching failed: {0}")]
    MatchingFailed(String),

    #[error("unknown error: {0}")]
    Unknown(#[source] anyhow::Error),
}

/// HTTP status hint per spec §6.1/§7. The server's single error-mapping
/// handler consults this instead of re-deriving it per route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatusHint(pub u16);

impl AgentBusError {
    pub fn status(&self) -> HttpStatusHint {
        HttpStatusHint(match self {
            AgentBusError::Validation(_) => 400,
            AgentBusError::Authorisation(_) => 403,
            AgentBusError::NotFound(_) => 404,
            AgentBusError::Conflict(_) => 409,
            AgentBusError::Configuration(_) => 500,
            AgentBusError::Database(_) => 500,
            AgentBusError::Storage(_) => 500,
            AgentBusError::Queue(_) => 500,
            AgentBusError::LanguageModel(_) => 503,
            AgentBusError::NoMatch => 404,
            AgentBusError::MatchingFailed(_) => 500,
            AgentBusError::Unknown(_) => 500,
        })
    }

    /// The stable error `name` used in the `{error:{name, message}}` body.
    pub fn name(&self) -> &'static str {
        match self {
            AgentBusError::Validation(_) => "Validation",
            AgentBusError::Authorisation(_) => "Authorisation",
            AgentBusError::NotFound(_) => "NotFound",
            AgentBusError::Conflict(_) => "Conflict",
            AgentBusError::Configuration(_) => "Configuration",
            AgentBusError::Database(_) => "Database",
            AgentBusError::Storage(_) => "Storage",
            AgentBusError::Queue(_) => "Queue",
            AgentBusError::LanguageModel(_) => "LanguageModel",
            AgentBusError::NoMatch => "NoMatchFound",
            AgentBusError::MatchingFailed(_) => "MatchingFailed",
            AgentBusError::Unknown(_) => "Unknown",
        }
    }

    /// Wraps an arbitrary error as the generic kind, preserving it as `cause`
    /// (spec §7: "unknown errors are wrapped into the generic kind with the
    /// original as `cause`").
    pub fn wrap(err: impl Into<anyhow::Error>) -> Self {
        AgentBusError::Unknown(err.into())
    }
}

pub type AgentBusResult<T> = Result<T, AgentBusError>;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The full error taxonomy a workflow can surface. Retry/breaker
/// classification matches on the discriminant directly rather than
/// inspecting message text, except at the LLM transport boundary where
/// [`llm::LlmError`] is converted here and string sniffing is unavoidable
/// because the upstream HTTP/SSE error shape carries no structure.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error (HTTP {status})")]
    Http5xx { status: u16 },

    #[error("client error (HTTP {status})")]
    Http4xx { status: u16 },

    #[error("call cancelled")]
    Cancelled,

    #[error("circuit breaker open for role {role}")]
    OpenCircuit { role: String },

    #[error("prompt exceeded the model's context window")]
    ContextOverflow,

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("illegal task state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: crate::task::TaskStatus, to: crate::task::TaskStatus },
}

impl OrchestratorError {
    /// Whether this error kind is retriable per the retry policy's classified
    /// set: network, timeout, 5xx, and 429 specifically among 4xx.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Network(_) | OrchestratorError::Timeout | OrchestratorError::Http5xx { .. }
        ) || matches!(self, OrchestratorError::Http4xx { status } if *status == 429)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            OrchestratorError::Network(_) => "NETWORK",
            OrchestratorError::Timeout => "TIMEOUT",
            OrchestratorError::Http5xx { .. } => "HTTP_5XX",
            OrchestratorError::Http4xx { .. } => "HTTP_4XX",
            OrchestratorError::Cancelled => "CANCELLED",
            OrchestratorError::OpenCircuit { .. } => "OPEN_CIRCUIT",
            OrchestratorError::ContextOverflow => "CONTEXT_OVERFLOW",
            OrchestratorError::Parse(_) => "PARSE",
            OrchestratorError::Policy(_) => "POLICY",
            OrchestratorError::Io(_) => "IO",
            OrchestratorError::Fatal(_) => "FATAL",
            OrchestratorError::Validation(_) => "VALIDATION",
            OrchestratorError::InvalidStateTransition { .. } => "FATAL",
        }
    }
}

impl From<llm::LlmError> for OrchestratorError {
    fn from(e: llm::LlmError) -> Self {
        match e {
            llm::LlmError::Network(msg) => OrchestratorError::Network(msg),
            llm::LlmError::Timeout => OrchestratorError::Timeout,
            llm::LlmError::Http5xx { status, .. } => OrchestratorError::Http5xx { status },
            llm::LlmError::Http4xx { status, .. } => OrchestratorError::Http4xx { status },
            llm::LlmError::ContextOverflow(_) => OrchestratorError::ContextOverflow,
            llm::LlmError::Parse(msg) => OrchestratorError::Parse(msg),
            llm::LlmError::Cancelled => OrchestratorError::Cancelled,
        }
    }
}

impl From<checkpoint::CheckpointError> for OrchestratorError {
    fn from(e: checkpoint::CheckpointError) -> Self {
        OrchestratorError::Fatal(format!("checkpoint store: {e}"))
    }
}

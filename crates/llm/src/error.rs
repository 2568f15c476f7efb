//! Error taxonomy for the LLM transport.
//!
//! Every variant here corresponds to one of the error kinds the resilience
//! layer classifies on (`NETWORK`, `TIMEOUT`, `HTTP_5XX`, `HTTP_4XX`,
//! `CONTEXT_OVERFLOW`, `PARSE`, `CANCELLED`). Classification happens once,
//! here, at the HTTP/JSON boundary — callers match on the enum discriminant
//! rather than re-parsing error text.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {body}")]
    Http5xx { status: u16, body: String },

    #[error("client error {status}: {body}")]
    Http4xx { status: u16, body: String },

    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// `true` for HTTP status codes that carry no retry value regardless of
    /// the general 4xx/5xx bucket they fall in (429 is handled by the
    /// resilience layer, not here, since retriability is its decision).
    pub fn http_status(&self) -> Option<u16> {
        match self {
            LlmError::Http5xx { status, .. } => Some(*status),
            LlmError::Http4xx { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Recognize provider error bodies that indicate the prompt exceeded the
/// model's context window. Checked against lowercased body text because the
/// upstream error shape is not standardized across OpenAI-compatible
/// servers; `context_length_exceeded` is OpenAI's actual error code, checked
/// alongside a couple of common human-readable phrasings.
pub fn looks_like_context_overflow(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context length")
        || lower.contains("too many tokens")
        || lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
}

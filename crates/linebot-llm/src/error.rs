use std::time::Duration;

/// Error type for LLM provider calls and chain execution.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport-level failure before any provider response.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider {provider} returned status {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
        /// Advertised wait from Retry-After style headers, when present.
        retry_after: Option<Duration>,
    },

    /// The provider answered 2xx but the body was not in the expected shape.
    #[error("response format: {0}")]
    ResponseFormat(String),

    /// JSON serialization or parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A handle could not be constructed from its configuration.
    #[error("configuration: {0}")]
    Config(String),

    /// The caller abandoned the request.
    #[error("request cancelled")]
    Cancelled,

    /// The per-request deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// No time left to retry; wraps the last underlying error.
    #[error("retry budget exhausted: {source}")]
    BudgetExhausted {
        #[source]
        source: Box<LlmError>,
    },
}

impl LlmError {
    /// The HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Provider { status, .. } => Some(*status),
            LlmError::Http(e) => e.status().map(|s| s.as_u16()),
            LlmError::BudgetExhausted { source } => source.status(),
            _ => None,
        }
    }

    /// The provider-advertised retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::Provider { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Wraps this error as a budget exhaustion.
    pub fn into_budget_exhausted(self) -> LlmError {
        LlmError::BudgetExhausted {
            source: Box::new(self),
        }
    }
}

//! LLM provider error taxonomy, normalized across all adapters.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid api key for provider {provider}")]
    InvalidAPIKey { provider: String },

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider returned no choices")]
    NoChoices,

    #[error("structured output did not conform: missing field '{0}'")]
    SchemaViolation(String),

    #[error("api error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Command(#[from] crate::command::CommandError),
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAPIKey { .. } => "InvalidAPIKey",
            Self::RateLimitExceeded { .. } => "RateLimitExceeded",
            Self::ModelNotFound(_) => "ModelNotFound",
            Self::NoChoices => "NoChoices",
            Self::SchemaViolation(_) => "SchemaViolation",
            Self::ApiError { .. } => "ApiError",
            Self::Network(_) => "Network",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::Timeout(_) => "Timeout",
            Self::Json(_) => "InvalidResponse",
            Self::UnknownProvider(_) => "UnknownProvider",
            Self::Command(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } => true,
            Self::ApiError { status, .. } => *status >= 500,
            Self::Network(_) => true,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

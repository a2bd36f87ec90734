// Provider error taxonomy
//
// Every failed model call maps to one variant. Each variant has a stable code
// that reaches the UI as `[CODE] message` inside a `chat-response` error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AIError {
    #[error("Cannot reach {provider}: {detail}")]
    ConnectionFailed { provider: String, detail: String },

    #[error("The API key was rejected: {0}")]
    AuthFailed(String),

    #[error("The model provider is rate limiting requests{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Carries the provider's own wording, which usually names the limit
    #[error("The conversation no longer fits the model's context window: {0}")]
    TokenLimitExceeded(String),

    #[error("{provider} did not answer within the chat timeout")]
    Timeout { provider: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model provider error: {0}")]
    ApiError(String),

    #[error("Unreadable model response: {0}")]
    ParseError(String),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!("; retry in {}s", secs),
        None => String::new(),
    }
}

impl AIError {
    /// Map a transport failure of `provider`'s HTTP call
    pub(crate) fn transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AIError::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_connect() {
            AIError::ConnectionFailed {
                provider: provider.to_string(),
                detail: err.to_string(),
            }
        } else if err.is_decode() {
            AIError::ParseError(err.to_string())
        } else {
            AIError::ApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AIError {
    fn from(err: serde_json::Error) -> Self {
        AIError::ParseError(err.to_string())
    }
}

pub type AIResult<T> = Result<T, AIError>;

/// Stable codes reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIErrorCode {
    ConnectionFailed,
    AuthFailed,
    RateLimited,
    TokenLimitExceeded,
    Timeout,
    ModelNotFound,
    ApiError,
    ParseError,
    InvalidConfig,
}

impl AIErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AIErrorCode::ConnectionFailed => "AI_CONNECTION_FAILED",
            AIErrorCode::AuthFailed => "AI_AUTH_FAILED",
            AIErrorCode::RateLimited => "AI_RATE_LIMITED",
            AIErrorCode::TokenLimitExceeded => "AI_TOKEN_LIMIT",
            AIErrorCode::Timeout => "AI_TIMEOUT",
            AIErrorCode::ModelNotFound => "AI_MODEL_NOT_FOUND",
            AIErrorCode::ApiError => "AI_API_ERROR",
            AIErrorCode::ParseError => "AI_PARSE_ERROR",
            AIErrorCode::InvalidConfig => "AI_INVALID_CONFIG",
        }
    }
}

impl AIError {
    pub fn code(&self) -> AIErrorCode {
        match self {
            AIError::ConnectionFailed { .. } => AIErrorCode::ConnectionFailed,
            AIError::AuthFailed(_) => AIErrorCode::AuthFailed,
            AIError::RateLimited { .. } => AIErrorCode::RateLimited,
            AIError::TokenLimitExceeded(_) => AIErrorCode::TokenLimitExceeded,
            AIError::Timeout { .. } => AIErrorCode::Timeout,
            AIError::ModelNotFound(_) => AIErrorCode::ModelNotFound,
            AIError::ApiError(_) => AIErrorCode::ApiError,
            AIError::ParseError(_) => AIErrorCode::ParseError,
            AIError::InvalidConfig(_) => AIErrorCode::InvalidConfig,
        }
    }

    /// Text for the `error` field of a `chat-response`
    pub fn to_user_message(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

/// `Retry-After` in whole seconds; HTTP-date values are ignored
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

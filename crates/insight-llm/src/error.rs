//! Error types for analysis-service operations

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Result type for analysis-service operations
pub type Result<T> = std::result::Result<T, LLMError>;

static RATE_LIMIT_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[\s_-]?limit|quota|resource[\s_-]?exhausted|too many requests").ok()
});

/// Whether an error message reads like provider throttling
///
/// Shared with collaborators whose errors only carry text.
pub fn looks_rate_limited(message: &str) -> bool {
    RATE_LIMIT_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(message))
}

/// Errors that can occur while talking to an analysis backend
#[derive(Error, Debug)]
pub enum LLMError {
    /// API request failed
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Invalid API key or authentication failed
    #[error("Invalid API key or authentication failed")]
    AuthenticationFailed,

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The call did not complete within its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with no text
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP error
    #[cfg(feature = "openai")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Unexpected response format
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LLMError {
    /// Whether this error signals provider throttling.
    ///
    /// Some backends report quota exhaustion with a generic status, so the
    /// message is matched as well as the variant.
    pub fn is_rate_limited(&self) -> bool {
        if matches!(self, Self::RateLimitExceeded(_)) {
            return true;
        }
        looks_rate_limited(&self.to_string())
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimitExceeded(_) => true,
            #[cfg(feature = "openai")]
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::RequestFailed(_) => self.is_rate_limited(),
            _ => false,
        }
    }
}

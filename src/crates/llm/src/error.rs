//! Error types for provider clients.

use pipeline_core::{GenerationError, SearchError};
use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors raised while talking to a provider over HTTP.
///
/// Clients convert these into [`GenerationError`] or [`SearchError`] at the
/// trait boundary, so pipeline code never sees a provider-specific type.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Provider service unavailable (Ollama not running, 5xx, ...).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid response from provider.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Any other non-success status.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError(body),
            408 => LlmError::Timeout(body),
            429 => LlmError::RateLimitExceeded(body),
            500..=599 => {
                LlmError::ServiceUnavailable(format!("{} API error {}: {}", provider, status, body))
            }
            _ => LlmError::ProviderError(format!("{} API error {}: {}", provider, status, body)),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::HttpError(e) => !e.is_decode() && !e.is_builder(),
            LlmError::ServiceUnavailable(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimitExceeded(_) => true,
            _ => false,
        }
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::AuthenticationError(_) | LlmError::ApiKeyNotFound(_)
        )
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

impl From<LlmError> for GenerationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::HttpError(e) => {
                if e.is_timeout() {
                    GenerationError::Timeout(e.to_string())
                } else if e.is_decode() {
                    GenerationError::MalformedResponse(e.to_string())
                } else {
                    GenerationError::Transport(e.to_string())
                }
            }
            LlmError::SerializationError(m) | LlmError::InvalidResponse(m) => {
                GenerationError::MalformedResponse(m)
            }
            LlmError::AuthenticationError(m) | LlmError::ApiKeyNotFound(m) => {
                GenerationError::Authentication(m)
            }
            LlmError::ServiceUnavailable(m) => GenerationError::Unavailable(m),
            LlmError::RateLimitExceeded(m) => GenerationError::RateLimited(m),
            LlmError::Timeout(m) => GenerationError::Timeout(m),
            LlmError::ProviderError(m) | LlmError::ConfigError(m) => GenerationError::Provider(m),
        }
    }
}

impl From<LlmError> for SearchError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::SerializationError(m) | LlmError::InvalidResponse(m) => {
                SearchError::MalformedResponse(m)
            }
            LlmError::ApiKeyNotFound(m) | LlmError::ConfigError(m) => {
                SearchError::Configuration(m)
            }
            other => SearchError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::UNAUTHORIZED, String::new()),
            LlmError::AuthenticationError(_)
        ));
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::BAD_GATEWAY, String::new()),
            LlmError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::BAD_REQUEST, String::new()),
            LlmError::ProviderError(_)
        ));
    }

    #[test]
    fn test_generation_error_mapping() {
        assert_eq!(
            GenerationError::from(LlmError::RateLimitExceeded("quota".into())),
            GenerationError::RateLimited("quota".into())
        );
        assert_eq!(
            GenerationError::from(LlmError::ApiKeyNotFound("GROQ_API_KEY".into())),
            GenerationError::Authentication("GROQ_API_KEY".into())
        );
        assert_eq!(
            GenerationError::from(LlmError::InvalidResponse("no choices".into())),
            GenerationError::MalformedResponse("no choices".into())
        );
    }

    #[test]
    fn test_retryable() {
        assert!(LlmError::Timeout("30s".into()).is_retryable());
        assert!(LlmError::ServiceUnavailable("503".into()).is_retryable());
        assert!(!LlmError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("{}".into()).is_retryable());
    }

    #[test]
    fn test_search_error_mapping() {
        assert!(matches!(
            SearchError::from(LlmError::ApiKeyNotFound("GOOGLE_API_KEY".into())),
            SearchError::Configuration(_)
        ));
        assert!(matches!(
            SearchError::from(LlmError::RateLimitExceeded("daily".into())),
            SearchError::Transport(_)
        ));
    }
}

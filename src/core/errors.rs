//! Custom error types for routing, analysis and sync operations

use thiserror::Error;

/// Errors raised anywhere in the AI dispatch pipeline
#[derive(Error, Debug)]
pub enum AiError {
    /// Adapter has spent its daily token budget
    #[error("Daily token limit exceeded for model {model}")]
    LimitExceeded {
        model: String,
    },

    /// Provider answered with a non-success HTTP status
    #[error("Provider error from {model}: {status} - {body}")]
    ProviderError {
        model: String,
        status: u16,
        body: String,
    },

    /// Connection-level failure talking to a provider
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Provider call exceeded the request timeout
    #[error("Request timeout")]
    TimeoutError,

    /// No adapter could serve the request
    #[error("All AI providers exhausted: {}", attempts.join("; "))]
    AllProvidersExhausted {
        attempts: Vec<String>,
    },

    /// Model output could not be parsed as JSON
    #[error("Invalid AI JSON: {message}")]
    InvalidAiJson {
        message: String,
        raw: String,
    },

    /// Analysis payload failed schema or range checks
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        raw: Option<String>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Requested entity does not exist
    #[error("Not found: {what}")]
    NotFound {
        what: String,
    },

    /// Backing store failure
    #[error("Store error: {message}")]
    StoreError {
        message: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl AiError {
    /// Whether the caller should try again later rather than give up
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::AllProvidersExhausted { .. }
            | AiError::LimitExceeded { .. }
            | AiError::NetworkError { .. }
            | AiError::TimeoutError => true,
            AiError::ProviderError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Raw model output attached to parse and validation failures
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AiError::InvalidAiJson { raw, .. } => Some(raw),
            AiError::ValidationError { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        AiError::ValidationError {
            message: message.into(),
            raw: None,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AiError::ConfigError {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for AiError {
    fn from(err: anyhow::Error) -> Self {
        AiError::InternalError(err.to_string())
    }
}

/// Result type for AI pipeline operations
pub type Result<T> = std::result::Result<T, AiError>;

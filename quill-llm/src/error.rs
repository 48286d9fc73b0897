//! LLM error types.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No constructor is registered under this provider name.
    #[error("Unknown LLM provider: '{0}'")]
    UnknownProvider(String),

    /// Network-level failure (connect, reset, body read).
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("LLM request timed out after {after_ms}ms")]
    Timeout {
        /// Configured timeout that elapsed.
        after_ms: u64,
    },

    /// The provider answered with a non-success HTTP status.
    #[error("LLM provider returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    /// Response decoded but carried no usable text.
    #[error("Empty response from LLM provider")]
    EmptyResponse,

    /// Prompt or output did not satisfy its schema. Not retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The caller's cancellation token fired.
    #[error("LLM operation cancelled")]
    Cancelled,

    /// No optimization iteration completed.
    #[error("Prompt optimization exhausted after {iterations} completed iteration(s): {source}")]
    OptimizationExhausted {
        /// Iterations that were recorded before the failure.
        iterations: usize,
        /// The error that ended the run.
        #[source]
        source: Box<LlmError>,
    },

    /// `set_option` was called with a key that is not recognized.
    #[error("Unknown option key: '{0}'")]
    UnknownOption(String),

    /// The provider lacks an optional capability.
    #[error("Provider does not support {0}")]
    Unsupported(&'static str),

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether the generate pipeline should retry after this error.
    ///
    /// HTTP 429 and 5xx are transient; other statuses are caller errors.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout { .. }
            | Self::MalformedResponse(_)
            | Self::EmptyResponse => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::UnknownProvider(_)
            | Self::Validation(_)
            | Self::Cancelled
            | Self::OptimizationExhausted { .. }
            | Self::UnknownOption(_)
            | Self::Unsupported(_)
            | Self::Config(_) => false,
        }
    }

    /// Whether this error is (or wraps) a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::OptimizationExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout { after_ms: 0 }
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::MalformedResponse(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LlmError>;

//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// An input of the pass (pod list, active target, credentials) could not be read
    #[error("Failed to {operation}: {source}")]
    InputUnavailable {
        operation: String,
        #[source]
        source: kube::Error,
    },

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a Kubernetes error raised while reading a pass input.
    pub fn input(operation: impl Into<String>, source: kube::Error) -> Self {
        Error::InputUnavailable {
            operation: operation.into(),
            source,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e)) => e.code == 404,
            Error::InputUnavailable {
                source: kube::Error::Api(e),
                ..
            } => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) | Error::InputUnavailable { source: e, .. } => is_retryable_kube(e),
            Error::Transient(_) => true,
            Error::Permanent(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Retry on network errors, rate limiting, and server errors
fn is_retryable_kube(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429)
        || matches!(e, kube::Error::Service(_))
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

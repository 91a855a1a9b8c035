//! Error types for the catalog operator

use thiserror::Error;

/// Main error type for catalog operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP transport error talking to a broker
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Broker returned a failure status code
    #[error("broker returned status {status}: {message}")]
    Broker {
        /// HTTP status code from the broker response
        status: u16,
        /// Error description, from the response body when available
        message: String,
    },

    /// A ServiceClass, ServicePlan, or ServiceBroker reference could not be resolved
    #[error("reference error: {0}")]
    Reference(String),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A malformed work queue key
    #[error("invalid queue key: {0}")]
    InvalidKey(String),

    /// An asynchronous broker operation has not reached a terminal state yet
    ///
    /// Returned by the poll handler on an `in progress` response. The worker
    /// loop treats any error as "requeue with backoff", so this error is the
    /// mechanism that drives repeated polling. It is expected traffic, not a
    /// failure.
    #[error("last operation for instance {namespace}/{name} is still in progress")]
    OperationInProgress {
        /// Namespace of the instance being polled
        namespace: String,
        /// Name of the instance being polled
        name: String,
    },
}

impl Error {
    /// Create a broker error with the given status code and message
    pub fn broker(status: u16, msg: impl Into<String>) -> Self {
        Self::Broker {
            status,
            message: msg.into(),
        }
    }

    /// Create a reference-resolution error with the given message
    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns true if this error only signals that polling must continue
    pub fn is_operation_in_progress(&self) -> bool {
        matches!(self, Self::OperationInProgress { .. })
    }
}

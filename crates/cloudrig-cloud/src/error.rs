//! Cloud provider error types
//!
//! Every fallible provider operation returns one of these variants so that
//! call sites can decide between retrying, treating absence as success, or
//! failing fast, without inspecting provider-specific fault payloads.

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// The session is no longer accepted by the control plane. Retryable
    /// after re-authentication.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote entity is busy completing another operation. Retryable.
    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// No unambiguous candidate could be chosen. Never retried.
    #[error("Ambiguous selection: {0}")]
    Ambiguous(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required remote resource (e.g. a public IP) is exhausted.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// An asynchronous control-plane task reached its failure state.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CloudError {
    /// Whether the failed operation may be reissued as-is.
    ///
    /// `AuthExpired` assumes the caller re-authenticated before retrying;
    /// the retry driver in [`crate::retry`] relies on this classification.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::AuthExpired(_) | CloudError::Busy(_))
    }

    /// Whether the error reports mere absence of the target entity.
    ///
    /// Delete-style operations treat absence as success; lookups feeding a
    /// required decision treat it as fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

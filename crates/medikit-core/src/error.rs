//! Shared error taxonomy.
//!
//! Subsystems whose unavailability is survivable (KV, semantic cache, graph
//! store, rerankers) degrade instead of returning these; the kinds here are
//! for failures that must reach the caller.

use thiserror::Error;

/// Result type for cross-crate operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced across component boundaries.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("external service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a data-access retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Database(_) | ServiceError::ExternalService { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ServiceError::Database("timeout".into()).is_retryable());
        assert!(ServiceError::external("llm", "503").is_retryable());
        assert!(!ServiceError::Validation("empty query".into()).is_retryable());
        assert!(!ServiceError::DeadlineExceeded.is_retryable());
    }
}

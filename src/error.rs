//! Error types for the integrity analysis engine

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during analysis
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse telemetry payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid policy: {0}")]
    PolicyError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Insufficient input for comparison: {0}")]
    InsufficientInput(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Analysis deadline exceeded after {0} ms")]
    DeadlineExceeded(u128),
}

impl ComputeError {
    /// Whether the caller may safely retry the failed operation.
    ///
    /// Every analysis is a read-only query, so storage failures are retryable;
    /// malformed input never is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ComputeError::Storage(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = ComputeError::from(StoreError::Unavailable("db down".to_string()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("db down"));
    }

    #[test]
    fn test_parse_errors_are_not_retryable() {
        let err = ComputeError::ParseError("bad".to_string());
        assert!(!err.is_retryable());

        let err = ComputeError::from(StoreError::Corrupt("row 7".to_string()));
        assert!(!err.is_retryable());
    }
}

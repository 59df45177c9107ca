//! Error types shared across the gateway

use thiserror::Error;

/// Errors from store operations, shared by backend adapters and the
/// write-behind queue that decorates them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent in the backend. Propagated verbatim from the
    /// adapter to the caller.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A write was attempted after shutdown had been signaled. The write
    /// was neither counted nor queued.
    #[error("instance is shutting down")]
    ShuttingDown,

    /// Network or API failure from the backend adapter after its own
    /// retry policy was exhausted.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Backend-adapter convenience constructor.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("reports/2024.csv".to_string());
        assert_eq!(err.to_string(), "object not found: reports/2024.csv");

        let err = StoreError::backend("connection reset");
        assert_eq!(err.to_string(), "backend error: connection reset");
    }
}

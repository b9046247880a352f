use thiserror::Error;

/// Errors from ledger storage and key lock operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("lock contention: {0}")]
    Lock(String),
}

impl StoreError {
    /// Whether repeating the same call later may succeed.
    ///
    /// Constraint violations are deterministic and serialization failures
    /// point at corrupt rows, so neither is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Backend(_) | Self::Lock(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(StoreError::Connection("refused".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StoreError::Lock("busy".into()).is_retryable());
        assert!(!StoreError::Constraint("dup".into()).is_retryable());
        assert!(!StoreError::Serialization("bad kind".into()).is_retryable());
    }
}

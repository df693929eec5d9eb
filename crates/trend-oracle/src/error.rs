use thiserror::Error;

/// Errors returned by oracle operations.
///
/// Only storage failures are fatal to a cycle. Everything else is surfaced
/// per item and the cycle carries on with its documented fallback.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("external call failed: {0}")]
    ExternalCallFailed(String),

    #[error("external call timed out after {0}s")]
    Timeout(u64),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl OracleError {
    /// Whether this error must end the current cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::LockPoisoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_fatal() {
        assert!(OracleError::LockPoisoned.is_fatal());
        assert!(OracleError::Database(rusqlite::Error::InvalidQuery).is_fatal());
        assert!(!OracleError::ExternalCallFailed("HTTP 502".into()).is_fatal());
        assert!(!OracleError::SourceUnavailable("trends24".into()).is_fatal());
        assert!(!OracleError::ConfigurationMissing("CONWAY_API_KEY".into()).is_fatal());
        assert!(!OracleError::Timeout(30).is_fatal());
    }
}

// Central Error Type for the Storage Engine

use thiserror::Error;

/// Application-level error type
///
/// Pool exhaustion (`ConnectionTimeout`) is kept apart from statement failures
/// (`Query`) so callers can back off and retry the former while surfacing the
/// latter. Messages never contain bound parameter values.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Timed out after {waited_ms}ms waiting for a database connection")]
    ConnectionTimeout { waited_ms: u64 },

    #[error("Connection pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Query error during {operation} [{statement}]: {message}")]
    Query {
        operation: &'static str,
        statement: String,
        message: String,
    },

    #[error("Transaction failed: {cause}; rollback also failed: {rollback_error}")]
    Transaction {
        cause: Box<AppError>,
        rollback_error: String,
    },

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Restore error: {0}")]
    Restore(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures that may succeed on a later attempt (pool exhaustion,
    /// pool temporarily draining). Statement failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionTimeout { .. } | AppError::PoolUnavailable(_)
        )
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Domain(_) => "DOMAIN_ERROR",
            AppError::Initialization(_) => "INITIALIZATION_ERROR",
            AppError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            AppError::PoolUnavailable(_) => "POOL_UNAVAILABLE",
            AppError::Query { .. } => "QUERY_ERROR",
            AppError::Transaction { .. } => "TRANSACTION_ERROR",
            AppError::Backup(_) => "BACKUP_ERROR",
            AppError::Restore(_) => "RESTORE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable_but_query_is_not() {
        let timeout = AppError::ConnectionTimeout { waited_ms: 50 };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.code(), "CONNECTION_TIMEOUT");
        assert!(timeout.to_string().contains("50ms"));

        let query = AppError::Query {
            operation: "get",
            statement: "SELECT * FROM notes WHERE id = ?".to_string(),
            message: "no such table: notes".to_string(),
        };
        assert!(!query.is_retryable());
        assert_eq!(query.code(), "QUERY_ERROR");
    }

    #[test]
    fn test_transaction_error_keeps_original_cause() {
        let err = AppError::Transaction {
            cause: Box::new(AppError::Validation("title required".into())),
            rollback_error: "database is locked".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("title required"));
        assert!(msg.contains("database is locked"));
        assert_eq!(err.code(), "TRANSACTION_ERROR");
    }
}

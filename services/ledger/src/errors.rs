use shared::errors::{ErrorCategory, ServiceError};
use shared::types::ValidationError;

/// Postgres SQLSTATE raised when `lock_timeout` expires
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
/// Postgres SQLSTATE raised when a statement exceeds `statement_timeout`
const PG_QUERY_CANCELED: &str = "57014";
const PG_SERIALIZATION_FAILURE: &str = "40001";
const PG_DEADLOCK_DETECTED: &str = "40P01";
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock or serialization contention; the whole unit of work may be retried
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The round was settled by an earlier call; repeating cannot succeed
    #[error("Already settled: {0}")]
    AlreadySettled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidInput(_) | LedgerError::InsufficientBalance { .. } => {
                ErrorCategory::Validation
            }
            LedgerError::NotFound(_) => ErrorCategory::NotFound,
            LedgerError::Conflict(_) | LedgerError::AlreadySettled(_) => ErrorCategory::Conflict,
            LedgerError::Timeout(_) => ErrorCategory::Timeout,
            LedgerError::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
            LedgerError::Unavailable(_) => ErrorCategory::Unavailable,
            LedgerError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a settlement that failed with this error may be repeated
    /// from scratch by the ledger itself.
    ///
    /// Store outages are left to the operator; only contention is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_) | LedgerError::Timeout(_))
    }

    /// Map to the cross-service error shape, logging full detail.
    pub fn to_service_error(&self) -> ServiceError {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::NotFound => {
                tracing::warn!(error = %self, "Request rejected");
            }
            _ => {
                tracing::error!(error = ?self, "Ledger operation failed");
            }
        }

        match self {
            LedgerError::InvalidInput(msg) => ServiceError::invalid_input(msg.clone()),
            LedgerError::InsufficientBalance { required, available } => {
                ServiceError::insufficient_balance(*required, *available)
            }
            LedgerError::NotFound(msg) => {
                if msg.starts_with("session") {
                    ServiceError::session_not_found(msg)
                } else {
                    ServiceError::record_not_found(msg)
                }
            }
            LedgerError::Conflict(msg) | LedgerError::AlreadySettled(msg) => {
                ServiceError::conflict(msg.clone())
            }
            LedgerError::Timeout(msg) => ServiceError::lock_timeout(msg.clone()),
            LedgerError::ResourceExhausted(msg) => ServiceError::exhausted(msg.clone()),
            LedgerError::Unavailable(msg) => ServiceError::unavailable(msg.clone()),
            LedgerError::Internal(e) => {
                ServiceError::internal("Internal error").with_context(e.to_string())
            }
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        LedgerError::InvalidInput(e.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            let code = db.code().map(|c| c.into_owned());
            let message = db.message().to_string();
            match code.as_deref() {
                Some(PG_LOCK_NOT_AVAILABLE) | Some(PG_QUERY_CANCELED) => {
                    return LedgerError::Timeout(message);
                }
                Some(PG_SERIALIZATION_FAILURE)
                | Some(PG_DEADLOCK_DETECTED)
                | Some(PG_UNIQUE_VIOLATION) => return LedgerError::Conflict(message),
                _ => {}
            }
        }

        match e {
            sqlx::Error::PoolTimedOut => {
                LedgerError::ResourceExhausted("database pool timed out".to_string())
            }
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                LedgerError::Unavailable(e.to_string())
            }
            sqlx::Error::RowNotFound => LedgerError::NotFound("row".to_string()),
            other => LedgerError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<redis::RedisError> for LedgerError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout(e.to_string())
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            LedgerError::Unavailable(e.to_string())
        } else {
            LedgerError::Internal(anyhow::Error::new(e))
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_contention_is_retryable() {
        assert!(LedgerError::Conflict("x".into()).is_retryable());
        assert!(LedgerError::Timeout("x".into()).is_retryable());
        assert!(!LedgerError::AlreadySettled("x".into()).is_retryable());
        assert!(!LedgerError::Unavailable("x".into()).is_retryable());
        assert!(!LedgerError::InvalidInput("x".into()).is_retryable());
        assert!(!LedgerError::Internal(anyhow::anyhow!("x")).is_retryable());
    }

    #[test]
    fn test_validation_error_maps_to_invalid_input() {
        let err: LedgerError = ValidationError::InvalidUserId(0).into();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_pool_timeout_is_resource_exhausted() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, LedgerError::ResourceExhausted(_)));
    }

    #[test]
    fn test_service_error_mapping() {
        let err = LedgerError::AlreadySettled("round abc".into());
        let service = err.to_service_error();
        assert_eq!(service.category, ErrorCategory::Conflict);
        assert_eq!(service.code, "CONFLICT_WRITE");
        assert!(!service.public_message().contains("abc"));

        let err = LedgerError::NotFound("session 1234".into());
        assert_eq!(err.to_service_error().code, "NOT_FOUND_SESSION");

        let err = LedgerError::InsufficientBalance { required: 10, available: 3 };
        assert_eq!(err.to_service_error().code, "VALIDATION_INSUFFICIENT_BALANCE");
    }
}

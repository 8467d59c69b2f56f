/// Shared error types for casino ledger services
///
/// Design Philosophy:
/// - Standardized error codes for consistent error handling across services
/// - Categorized by how a caller must react (fix input, retry, escalate)
/// - Includes context fields for operator debugging
///
/// Usage:
/// - The ledger maps its internal errors into ServiceError at its boundary
/// - Error codes follow pattern: <CATEGORY>_<SPECIFIC>
/// - Context is for operator logs; `public_message` is what end users see
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error categories that map to caller behavior, status codes and log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed or out-of-range arguments (400). Never retried.
    Validation,

    /// Referenced session or record does not exist (404)
    NotFound,

    /// Lock contention or commit-time conflict (409). Retry the unit of work.
    Conflict,

    /// Lock wait or statement exceeded the store timeout (503)
    Timeout,

    /// Store could not open another transaction (503)
    ResourceExhausted,

    /// Backing store unreachable (503). Retry with backoff.
    Unavailable,

    /// Invariant violation (500). Bug signal.
    Internal,
}

impl ErrorCategory {
    /// Map error category to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Timeout => 503,
            ErrorCategory::ResourceExhausted => 503,
            ErrorCategory::Unavailable => 503,
            ErrorCategory::Internal => 500,
        }
    }

    /// Map error category to log level
    pub fn log_level(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "warn",
            ErrorCategory::NotFound => "info",
            ErrorCategory::Conflict => "warn",
            ErrorCategory::Timeout => "warn",
            ErrorCategory::ResourceExhausted => "error",
            ErrorCategory::Unavailable => "error",
            ErrorCategory::Internal => "error",
        }
    }

    /// Whether repeating the whole unit of work can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Conflict
                | ErrorCategory::Timeout
                | ErrorCategory::ResourceExhausted
                | ErrorCategory::Unavailable
        )
    }
}

/// Standard error codes used across all services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    // Validation errors
    pub const VALIDATION_INVALID_INPUT: ErrorCode = ErrorCode("VALIDATION_INVALID_INPUT");
    pub const VALIDATION_INSUFFICIENT_BALANCE: ErrorCode =
        ErrorCode("VALIDATION_INSUFFICIENT_BALANCE");

    // Resource errors
    pub const NOT_FOUND_SESSION: ErrorCode = ErrorCode("NOT_FOUND_SESSION");
    pub const NOT_FOUND_RECORD: ErrorCode = ErrorCode("NOT_FOUND_RECORD");

    // Concurrency errors
    pub const CONFLICT_WRITE: ErrorCode = ErrorCode("CONFLICT_WRITE");
    pub const TIMEOUT_LOCK_WAIT: ErrorCode = ErrorCode("TIMEOUT_LOCK_WAIT");

    // Store errors
    pub const STORE_EXHAUSTED: ErrorCode = ErrorCode("STORE_EXHAUSTED");
    pub const STORE_UNAVAILABLE: ErrorCode = ErrorCode("STORE_UNAVAILABLE");

    // Internal errors
    pub const INTERNAL_UNEXPECTED: ErrorCode = ErrorCode("INTERNAL_UNEXPECTED");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standardized error structure used across all services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    /// Error category (determines status code and log level)
    pub category: ErrorCategory,

    /// Structured error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context for operators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ServiceError {
    /// Create a new ServiceError
    pub fn new(category: ErrorCategory, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::VALIDATION_INVALID_INPUT,
            message,
        )
    }

    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::VALIDATION_INSUFFICIENT_BALANCE,
            "Insufficient balance",
        )
        .with_context(format!("required: {}, available: {}", required, available))
    }

    pub fn session_not_found(session_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            ErrorCode::NOT_FOUND_SESSION,
            format!("Session not found: {}", session_id),
        )
    }

    pub fn record_not_found(what: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            ErrorCode::NOT_FOUND_RECORD,
            format!("Not found: {}", what),
        )
    }

    pub fn conflict(context: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, ErrorCode::CONFLICT_WRITE, "Write conflict")
            .with_context(context)
    }

    pub fn lock_timeout(context: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            ErrorCode::TIMEOUT_LOCK_WAIT,
            "Timed out waiting for lock",
        )
        .with_context(context)
    }

    pub fn exhausted(context: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::ResourceExhausted,
            ErrorCode::STORE_EXHAUSTED,
            "Store cannot open a new transaction",
        )
        .with_context(context)
    }

    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Unavailable,
            ErrorCode::STORE_UNAVAILABLE,
            "Backing store unavailable",
        )
        .with_context(context)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorCode::INTERNAL_UNEXPECTED, message)
    }

    /// Message safe to show an end user
    ///
    /// Only validation and not-found errors carry their own message; every
    /// other failure collapses to a generic retry prompt.
    pub fn public_message(&self) -> &str {
        match self.category {
            ErrorCategory::Validation | ErrorCategory::NotFound => &self.message,
            _ => "Something went wrong, please try again",
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] {}: {}", self.code, self.message, context)
        } else {
            write!(f, "[{}] {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ServiceError {}

// Convenience type alias
pub type Result<T> = std::result::Result<T, ServiceError>;

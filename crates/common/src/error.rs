//! Error types for clubdesk.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Kind of document store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOperation {
    /// Document get, query or subscription.
    Read,
    /// Set, update or batch commit.
    Write,
    /// Document deletion.
    Delete,
}

impl StoreOperation {
    /// Returns the lowercase operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider error code reported by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorCode {
    /// The service is temporarily unreachable.
    Unavailable,
    /// The operation did not finish before its deadline.
    DeadlineExceeded,
    /// The operation was aborted by a concurrency conflict.
    Aborted,
    /// A quota or rate limit was exhausted.
    ResourceExhausted,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// The addressed document does not exist.
    NotFound,
    /// The request was malformed (bad path, oversized batch, ...).
    InvalidArgument,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// Internal provider failure.
    Internal,
    /// Unclassified failure.
    Unknown,
}

impl StoreErrorCode {
    /// Returns the provider code string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Aborted => "aborted",
            Self::ResourceExhausted => "resource-exhausted",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::InvalidArgument => "invalid-argument",
            Self::FailedPrecondition => "failed-precondition",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }

    /// Whether an operation failing with this code may succeed when repeated.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::Aborted | Self::ResourceExhausted
        )
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed document store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store {operation} failed ({code}): {message}")]
pub struct StoreError {
    /// Operation kind that failed.
    pub operation: StoreOperation,
    /// Provider error code.
    pub code: StoreErrorCode,
    /// Provider message.
    pub message: String,
}

impl StoreError {
    /// Create a new store error.
    pub fn new(operation: StoreOperation, code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            message: message.into(),
        }
    }

    /// Shorthand for a read failure.
    pub fn read(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(StoreOperation::Read, code, message)
    }

    /// Shorthand for a write failure.
    pub fn write(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(StoreOperation::Write, code, message)
    }

    /// Shorthand for a delete failure.
    pub fn delete(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(StoreOperation::Delete, code, message)
    }

    /// Whether the underlying code is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code.is_transient()
    }

    /// Whether the caller lacks permission. Listener code surfaces these.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.code == StoreErrorCode::PermissionDenied
    }
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {category} usage {current} reached limit {limit}")]
    RateLimited {
        /// Usage category key.
        category: String,
        /// Counter value at check time.
        current: i64,
        /// Configured limit.
        limit: i64,
    },

    // === Server Errors ===
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for caller-facing reports.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Store(e) => match e.operation {
                StoreOperation::Read => "STORE_READ_ERROR",
                StoreOperation::Write => "STORE_WRITE_ERROR",
                StoreOperation::Delete => "STORE_DELETE_ERROR",
            },
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may offer a retry.
    ///
    /// Only transient store failures qualify, and deletes never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient() && e.operation != StoreOperation::Delete,
            _ => false,
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Config(_) | Self::Internal(_))
    }

    /// Human-readable failure text, categorized by cause.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{what} could not be found."),
            Self::Unauthorized => "Please sign in to continue.".to_string(),
            Self::Forbidden(_) => "You do not have permission to do this.".to_string(),
            Self::BadRequest(msg) | Self::Validation(msg) => msg.clone(),
            Self::Conflict(msg) => format!("The data changed in the meantime: {msg}"),
            Self::RateLimited { limit, .. } => {
                format!("You have reached the limit of {limit}. Please try again later.")
            }
            Self::Store(e) if e.is_permission_denied() => {
                "You do not have permission to access this data.".to_string()
            }
            Self::Store(e) if e.is_transient() => {
                "The service is temporarily unavailable. Please try again.".to_string()
            }
            Self::Store(e) => match e.operation {
                StoreOperation::Read => "Loading data failed.".to_string(),
                StoreOperation::Write => "Saving failed.".to_string(),
                StoreOperation::Delete => "Deleting failed.".to_string(),
            },
            Self::Config(_) | Self::Internal(_) => "An unexpected error occurred.".to_string(),
        }
    }

    /// Log this error with a level matching its category.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        if self.is_server_error() {
            tracing::error!(error = %self, code, context, "Operation failed");
        } else {
            tracing::debug!(error = %self, code, context, "Operation rejected");
        }
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Malformed document: {err}"))
    }
}

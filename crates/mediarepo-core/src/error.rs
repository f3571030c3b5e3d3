//! Error types module
//!
//! All failures surfaced by the upload/download layer are unified under `AppError`.
//! Every variant maps to exactly one outcome kind a caller can act on; backend and
//! database detail is kept for operators (`detailed_message`) and never rendered
//! into the client message.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like policy rejections
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "NOT_YET_UPLOADED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown media, or media that has been quarantined.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media not yet uploaded: {0}")]
    NotYetUploaded(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Payload too small: {0}")]
    PayloadTooSmall(String),

    #[error("Quota exceeded for user {0}")]
    QuotaExceeded(String),

    #[error("Cannot overwrite media: {0}")]
    CannotOverwrite(String),

    /// Uploaded bytes match content that has been quarantined.
    #[error("Content not permitted: {0}")]
    ContentNotPermitted(String),

    /// The record store refused to create a record because the key is taken.
    #[error("Duplicate media id: {0}")]
    Duplicate(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, sensitive, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        AppError::Database(_) => (500, "DATABASE_ERROR", true, true, LogLevel::Error),
        AppError::Storage(_) => (500, "STORAGE_ERROR", true, true, LogLevel::Error),
        AppError::Unsupported(_) => (501, "UNSUPPORTED_OPERATION", false, true, LogLevel::Error),
        AppError::InvalidInput(_) => (400, "INVALID_INPUT", false, false, LogLevel::Debug),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, false, LogLevel::Debug),
        AppError::NotYetUploaded(_) => (504, "NOT_YET_UPLOADED", true, false, LogLevel::Debug),
        AppError::PayloadTooLarge(_) => (413, "TOO_LARGE", false, false, LogLevel::Debug),
        AppError::PayloadTooSmall(_) => (400, "TOO_SMALL", false, false, LogLevel::Debug),
        AppError::QuotaExceeded(_) => (403, "QUOTA_EXCEEDED", false, false, LogLevel::Warn),
        AppError::CannotOverwrite(_) => (409, "CANNOT_OVERWRITE", false, false, LogLevel::Debug),
        AppError::ContentNotPermitted(_) => (400, "NOT_PERMITTED", false, false, LogLevel::Warn),
        AppError::Duplicate(_) => (409, "DUPLICATE", true, false, LogLevel::Debug),
        AppError::Internal(_) => (500, "INTERNAL_ERROR", true, true, LogLevel::Error),
        AppError::InternalWithSource { .. } => (500, "INTERNAL_ERROR", true, true, LogLevel::Error),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::Unsupported(_) => "Unsupported",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::NotYetUploaded(_) => "NotYetUploaded",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::PayloadTooSmall(_) => "PayloadTooSmall",
            AppError::QuotaExceeded(_) => "QuotaExceeded",
            AppError::CannotOverwrite(_) => "CannotOverwrite",
            AppError::ContentNotPermitted(_) => "ContentNotPermitted",
            AppError::Duplicate(_) => "Duplicate",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Unexpected Error".to_string(),
            AppError::Storage(_) => "Unexpected Error".to_string(),
            AppError::Unsupported(_) => "Unexpected Error".to_string(),
            AppError::Internal(_) => "Unexpected Error".to_string(),
            AppError::InternalWithSource { .. } => "Unexpected Error".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(_) => "Media not found".to_string(),
            AppError::NotYetUploaded(_) => "Media has not been uploaded yet".to_string(),
            AppError::PayloadTooLarge(_) => "Too Large".to_string(),
            AppError::PayloadTooSmall(_) => "Too Small".to_string(),
            AppError::QuotaExceeded(_) => "Quota Exceeded".to_string(),
            AppError::CannotOverwrite(_) => "This media has already been uploaded.".to_string(),
            AppError::ContentNotPermitted(_) => "This file is not permitted on this server".to_string(),
            AppError::Duplicate(_) => "Media id already in use".to_string(),
        }
    }
}

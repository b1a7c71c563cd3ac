//! Error types module
//!
//! `AppError` is the caller-facing taxonomy returned synchronously by the
//! orchestrator and rendered by the HTTP layer. `PipelineError` describes why a
//! stage failed after the upload call already returned; it is captured on the
//! record and surfaced through status polling.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::models::PipelineStage;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "DATABASE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
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

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

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

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Validation(_) => (
            422,
            "VALIDATION_ERROR",
            false,
            Some("Upload a supported document type within the size limit"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::BadRequest(_) => (
            400,
            "BAD_REQUEST",
            false,
            Some("Check request format and parameters"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::Conflict(_) => (
            409,
            "CONFLICT",
            true,
            Some("Fetch the current status and retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unavailable(_) => (
            503,
            "SERVICE_UNAVAILABLE",
            true,
            Some("Wait a few seconds and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::Validation(_) => "Validation",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::BadRequest(_) => "BadRequest",
            AppError::NotFound(_) => "NotFound",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::Conflict(_) => "Conflict",
            AppError::Unavailable(_) => "Unavailable",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
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

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access record store".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Validation(ref msg)
            | AppError::InvalidInput(ref msg)
            | AppError::BadRequest(ref msg)
            | AppError::NotFound(ref msg)
            | AppError::PayloadTooLarge(ref msg)
            | AppError::Conflict(ref msg)
            | AppError::Unavailable(ref msg) => msg.clone(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

/// Why a pipeline stage failed.
///
/// Stage outcomes are values: the worker maps each variant onto a record
/// status (`infected`, `failed` or `finalize_failed`) and a human-readable
/// `errorMessage`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("File rejected: infected with {virus_name}")]
    Infected { virus_name: String },

    #[error("Virus scan inconclusive: {0}")]
    Scan(String),

    #[error("Sanitization failed: {0}")]
    Sanitization(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Parsing failed: {0}")]
    Parsing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Finalize failed: {0}")]
    Finalize(String),

    #[error("{stage} stage timed out after {secs}s")]
    Timeout { stage: PipelineStage, secs: u64 },

    #[error("Record store error: {0}")]
    Record(String),
}

impl PipelineError {
    /// Whether another attempt with the same input could succeed.
    ///
    /// Drives the bounded in-worker retry loop: unrecoverable errors skip the
    /// remaining attempts.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Infected { .. }
            | PipelineError::Integrity { .. }
            | PipelineError::Sanitization(_) => false,
            PipelineError::Scan(_)
            | PipelineError::Extraction(_)
            | PipelineError::Parsing(_)
            | PipelineError::Storage(_)
            | PipelineError::Finalize(_)
            | PipelineError::Timeout { .. }
            | PipelineError::Record(_) => true,
        }
    }

    /// Whether `RetryProcessing` may re-enter the pipeline after this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Infected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access record store");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("Intake record not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Intake record not found");
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_validation() {
        let err = AppError::Validation("Extension 'exe' is not allowed".to_string());
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("exe"));
    }

    #[test]
    fn test_bad_request_is_400_class() {
        let err = AppError::BadRequest("Record is not in a retryable state".to_string());
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_type(), "BadRequest");
    }

    #[test]
    fn test_detailed_message_walks_source_chain() {
        let err = AppError::from(anyhow::anyhow!("disk full").context("writing blob"));
        let details = err.detailed_message();
        assert!(details.contains("Internal error with source"));
        assert!(details.contains("disk full"));
    }

    #[test]
    fn test_pipeline_error_classification() {
        let infected = PipelineError::Infected {
            virus_name: "Eicar-Test-Signature".to_string(),
        };
        assert!(!infected.is_transient());
        assert!(!infected.is_retryable());

        let timeout = PipelineError::Timeout {
            stage: PipelineStage::Extract,
            secs: 120,
        };
        assert!(timeout.is_transient());
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "extract stage timed out after 120s");

        let integrity = PipelineError::Integrity {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!integrity.is_transient());
        assert!(integrity.is_retryable());
    }
}

//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Anything that
//! converts into [`AppError`] also converts into [`HttpAppError`] and renders
//! the same status, body and log line.

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use intake_core::{AppError, ErrorMetadata, LogLevel};
use intake_db::StoreError;
use intake_processing::ValidationError;
use intake_storage::StorageError;
use intake_worker::SessionError;
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

use crate::services::IntakeError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether the same request may succeed later
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Wrapper so `IntoResponse` can be implemented for the core error type.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        })
    }
}

impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        let body_text = rejection.body_text();
        let message = if body_text.contains("expected a formatted UUID") {
            "Invalid request body: qid and sessionID must be UUID strings".to_string()
        } else {
            format!("Invalid request body: {}", body_text)
        };
        HttpAppError(AppError::InvalidInput(message))
    }
}

/// JSON body extractor that answers with [`ErrorResponse`] instead of axum's
/// plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod"))
        .unwrap_or(false)
}

fn error_body(error: &AppError, with_details: bool) -> ErrorResponse {
    ErrorResponse {
        error: error.client_message(),
        details: with_details.then(|| error.detailed_message()),
        error_type: with_details.then(|| error.error_type().to_string()),
        code: error.error_code().to_string(),
        recoverable: error.is_recoverable(),
        suggested_action: error.suggested_action().map(String::from),
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;
        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Details are never shown in production or for sensitive errors.
        let with_details = !is_production_env() && !app_error.is_sensitive();
        (status, Json(error_body(app_error, with_details))).into_response()
    }
}

pub(crate) fn storage_app_error(err: StorageError) -> AppError {
    match err {
        StorageError::NotFound(msg) => AppError::NotFound(msg),
        StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
        StorageError::IoError(err) => AppError::Internal(format!("IO error: {}", err)),
        StorageError::ConfigError(msg) => AppError::Internal(msg),
        StorageError::UploadFailed(msg)
        | StorageError::DownloadFailed(msg)
        | StorageError::DeleteFailed(msg)
        | StorageError::BackendError(msg) => AppError::Storage(msg),
    }
}

// Domain errors go through AppError so every crate's mapping lives in one place.

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        HttpAppError(storage_app_error(err))
    }
}

impl From<ValidationError> for HttpAppError {
    fn from(err: ValidationError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<StoreError> for HttpAppError {
    fn from(err: StoreError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<SessionError> for HttpAppError {
    fn from(err: SessionError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<IntakeError> for HttpAppError {
    fn from(err: IntakeError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<validator::ValidationErrors> for HttpAppError {
    fn from(err: validator::ValidationErrors) -> Self {
        HttpAppError(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::Qid;

    #[test]
    fn test_from_storage_error_not_found() {
        let HttpAppError(app_err) = StorageError::NotFound("quarantine/x/cv.pdf".to_string()).into();
        match app_err {
            AppError::NotFound(msg) => assert_eq!(msg, "quarantine/x/cv.pdf"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_from_storage_error_backend_is_storage() {
        let HttpAppError(app_err) = StorageError::UploadFailed("bucket gone".to_string()).into();
        assert!(matches!(app_err, AppError::Storage(ref msg) if msg == "bucket gone"));
        assert_eq!(app_err.http_status_code(), 500);
        assert!(app_err.is_sensitive());
    }

    #[test]
    fn test_from_storage_error_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let HttpAppError(app_err) = StorageError::IoError(io_err).into();
        match app_err {
            AppError::Internal(msg) => assert!(msg.contains("read-only")),
            other => panic!("Expected Internal, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_status_codes() {
        let HttpAppError(too_large) = ValidationError::FileTooLarge {
            size: 1000,
            max: 500,
        }
        .into();
        assert_eq!(too_large.http_status_code(), 413);

        let HttpAppError(denied) = ValidationError::DeniedExtension("exe".to_string()).into();
        assert_eq!(denied.http_status_code(), 422);
    }

    #[test]
    fn test_intake_errors_map_to_client_statuses() {
        let qid = Qid::generate();
        let HttpAppError(missing) = IntakeError::NotFound(qid).into();
        assert_eq!(missing.http_status_code(), 404);

        let HttpAppError(not_retryable) = IntakeError::NotRetryable {
            qid,
            status: intake_core::IntakeStatus::Archived,
        }
        .into();
        assert_eq!(not_retryable.http_status_code(), 400);

        let HttpAppError(concurrent) = IntakeError::Concurrent(qid).into();
        assert_eq!(concurrent.http_status_code(), 409);
    }

    #[test]
    fn test_error_body_hides_details_when_asked() {
        let err = AppError::Storage("bucket gone".to_string());
        let body = error_body(&err, false);
        assert_eq!(body.code, "STORAGE_ERROR");
        assert_eq!(body.error, "Failed to access storage");
        assert!(body.details.is_none());
        assert!(body.recoverable);

        let body = error_body(&AppError::NotFound("Intake record gone".to_string()), true);
        assert_eq!(body.details.as_deref(), Some("Not found: Intake record gone"));
        assert_eq!(body.error_type.as_deref(), Some("NotFound"));
    }

    #[test]
    fn test_error_response_shape() {
        let body = error_body(&AppError::Conflict("record moved".to_string()), true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "CONFLICT");
        assert_eq!(json["recoverable"], true);
        assert_eq!(json["error"], "record moved");
        assert!(json["suggested_action"].is_string());
    }
}

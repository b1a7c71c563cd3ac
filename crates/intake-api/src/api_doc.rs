//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use crate::setup::routes;
use intake_core::models;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Intake API",
        version = "0.1.0",
        description = "File intake pipeline: upload validation, quarantine, antivirus scanning, sanitization, text extraction, resume parsing and archival. Stage work is asynchronous; poll /intake/status/{qid} for progress."
    ),
    paths(
        handlers::intake::initiate_upload,
        handlers::intake::upload_bytes,
        handlers::intake::complete_upload,
        handlers::intake::get_status,
        handlers::intake::get_history,
        handlers::intake::retry_processing,
        handlers::sessions::create_session,
        handlers::sessions::get_session,
        handlers::workers::worker_status,
        routes::health::health_check,
    ),
    components(schemas(
        error::ErrorResponse,
        routes::HealthCheckResponse,
        models::InitiateUploadRequest,
        models::InitiateUploadResponse,
        models::UploadTarget,
        models::CompleteUploadRequest,
        models::PipelineStartResponse,
        models::HistoryResponse,
        models::StatusTransition,
        models::IntakeRecord,
        models::IntakeStatus,
        models::IntakeSource,
        models::PipelineStage,
        models::CreateSessionRequest,
        models::FileSession,
        models::SessionStatus,
        models::SessionType,
        models::WorkerStatusResponse,
        models::StageWorkerStatus,
    )),
    tags(
        (name = "intake", description = "Upload and record lifecycle"),
        (name = "sessions", description = "Upload sessions"),
        (name = "operations", description = "Health and worker pool status"),
    )
)]
struct ApiDoc;

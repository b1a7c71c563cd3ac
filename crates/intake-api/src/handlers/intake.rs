//! Upload and record endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::Engine as _;
use intake_core::models::{
    CompleteUploadRequest, HistoryResponse, InitiateUploadRequest, InitiateUploadResponse,
    PipelineStartResponse,
};
use intake_core::{AppError, IntakeRecord, Qid};
use validator::Validate;

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::services::UploadPayload;
use crate::state::AppState;

fn parse_qid(raw: &str) -> Result<Qid, HttpAppError> {
    raw.parse::<Qid>().map_err(HttpAppError::from)
}

/// Validate a declared upload and return where to send its bytes
#[utoipa::path(
    post,
    path = "/intake/initiate-upload",
    tag = "intake",
    request_body = InitiateUploadRequest,
    responses(
        (status = 200, description = "Upload initiated", body = InitiateUploadResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 413, description = "Declared size over the limit", body = ErrorResponse),
        (status = 422, description = "File type not accepted", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(operation = "initiate_upload"))]
pub async fn initiate_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<InitiateUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;
    let response = state.orchestrator.initiate_upload(request).await?;
    Ok(Json(response))
}

/// Direct upload target for backends that cannot sign URLs
#[utoipa::path(
    put,
    path = "/intake/upload/{qid}",
    tag = "intake",
    params(("qid" = String, Path, description = "Intake record ID")),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 204, description = "Bytes stored; call complete-upload next"),
        (status = 400, description = "Record no longer accepts uploads", body = ErrorResponse),
        (status = 404, description = "Unknown record", body = ErrorResponse),
        (status = 413, description = "Body over the size limit", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, body), fields(qid = %qid, size_bytes = body.len()))]
pub async fn upload_bytes(
    State(state): State<Arc<AppState>>,
    Path(qid): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let qid = parse_qid(&qid)?;
    state.orchestrator.stage_upload(qid, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Quarantine an upload and start the pipeline
#[utoipa::path(
    post,
    path = "/intake/complete-upload",
    tag = "intake",
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "Upload quarantined, or its current status if already completed", body = PipelineStartResponse),
        (status = 400, description = "Nothing was uploaded for this record", body = ErrorResponse),
        (status = 404, description = "Unknown record", body = ErrorResponse),
        (status = 422, description = "Upload rejected", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(qid = %request.qid, inline = request.content_base64.is_some()))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CompleteUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;

    let payload = match request.content_base64 {
        Some(encoded) => {
            let data = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| AppError::InvalidInput(format!("contentBase64 is not valid base64: {}", e)))?;
            UploadPayload::Bytes {
                data: Bytes::from(data),
                content_hash: request.content_hash,
            }
        }
        None => UploadPayload::Staged {
            content_hash: request.content_hash,
        },
    };

    let response = state
        .orchestrator
        .complete_upload(request.qid, payload)
        .await?;
    Ok(Json(response))
}

/// Current snapshot of an intake record
#[utoipa::path(
    get,
    path = "/intake/status/{qid}",
    tag = "intake",
    params(("qid" = String, Path, description = "Intake record ID")),
    responses(
        (status = 200, description = "Record snapshot", body = IntakeRecord),
        (status = 404, description = "Unknown record", body = ErrorResponse)
    )
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(qid): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let qid = parse_qid(&qid)?;
    let record = state.orchestrator.get_status(qid).await?;
    Ok(Json(record))
}

/// Ordered status transitions of an intake record
#[utoipa::path(
    get,
    path = "/intake/history/{qid}",
    tag = "intake",
    params(("qid" = String, Path, description = "Intake record ID")),
    responses(
        (status = 200, description = "Transition history", body = HistoryResponse),
        (status = 404, description = "Unknown record", body = ErrorResponse)
    )
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(qid): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let qid = parse_qid(&qid)?;
    let history = state.orchestrator.history(qid).await?;
    Ok(Json(history))
}

/// Resume a failed record at the stage that failed
#[utoipa::path(
    post,
    path = "/intake/retry/{qid}",
    tag = "intake",
    params(("qid" = String, Path, description = "Intake record ID")),
    responses(
        (status = 200, description = "Retry scheduled", body = PipelineStartResponse),
        (status = 400, description = "Record is not in a retryable status", body = ErrorResponse),
        (status = 404, description = "Unknown record", body = ErrorResponse),
        (status = 409, description = "Record changed concurrently", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(operation = "retry_processing"))]
pub async fn retry_processing(
    State(state): State<Arc<AppState>>,
    Path(qid): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let qid = parse_qid(&qid)?;
    let response = state.orchestrator.retry_processing(qid).await?;
    Ok(Json(response))
}

//! Upload session endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use intake_core::models::{CreateSessionRequest, FileSession};
use intake_core::Sid;
use validator::Validate;

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

/// Open an upload session that groups several files
#[utoipa::path(
    post,
    path = "/intake/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session opened", body = FileSession),
        (status = 400, description = "Malformed request", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(session_type = %request.session_type))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;
    let session = state
        .sessions
        .open(request.user_id, request.session_type)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Aggregate progress of an upload session
#[utoipa::path(
    get,
    path = "/intake/sessions/{sid}",
    tag = "sessions",
    params(("sid" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session snapshot", body = FileSession),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let sid: Sid = sid.parse()?;
    let session = state.sessions.snapshot(sid).await?;
    Ok(Json(session))
}

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use intake_core::models::WorkerStatusResponse;

use crate::state::AppState;

/// Per-stage queue depth, worker counts and records by status
#[utoipa::path(
    get,
    path = "/intake/worker-status",
    tag = "operations",
    responses(
        (status = 200, description = "Worker pool snapshot", body = WorkerStatusResponse)
    )
)]
pub async fn worker_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.workers.status().await)
}

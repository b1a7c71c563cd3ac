//! Health check handler and response type.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

const TIMEOUT: Duration = Duration::from_secs(5);
const HEALTHY: &str = "healthy";

/// Run an async check with timeout; returns "healthy", "timeout", or "{prefix}: {error}".
async fn run_check<F, E>(timeout: Duration, f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(Ok(())) => HEALTHY.to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: String,
    pub record_store: String,
    pub storage: String,
    pub event_bus: String,
}

/// Liveness of the record store, storage and event bus
#[utoipa::path(
    get,
    path = "/intake/health",
    tag = "operations",
    responses(
        (status = 200, description = "All dependencies healthy", body = HealthCheckResponse),
        (status = 503, description = "At least one dependency unhealthy", body = HealthCheckResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let records = state.records.clone();
    let record_store = run_check(TIMEOUT, async move { records.ping().await }, "unhealthy").await;

    let storage = state.storage.clone();
    let storage = run_check(
        TIMEOUT,
        async move {
            storage
                .exists("quarantine/health-check-non-existent-key")
                .await
                .map(drop)
        },
        "unhealthy",
    )
    .await;

    let event_bus = run_check(
        TIMEOUT,
        async {
            if !state.bus.is_open() {
                return Err("stage queues closed");
            }
            if !state.workers.is_running() {
                return Err("worker pool not running");
            }
            Ok(())
        },
        "unhealthy",
    )
    .await;

    let healthy = [&record_store, &storage, &event_bus]
        .iter()
        .all(|check| check.as_str() == HEALTHY);
    if !healthy {
        tracing::warn!(
            record_store = %record_store,
            storage = %storage,
            event_bus = %event_bus,
            "Health check failed"
        );
    }

    let response = HealthCheckResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        record_store,
        storage,
        event_bus,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

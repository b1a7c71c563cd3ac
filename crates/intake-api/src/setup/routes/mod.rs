//! Route configuration and setup.

pub(crate) mod health;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use intake_core::Config;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api_doc;
use crate::handlers;
use crate::state::AppState;

pub use health::HealthCheckResponse;

const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Inline base64 inflates a body by a third, plus the JSON envelope.
fn body_limit(config: &Config) -> usize {
    let max = usize::try_from(config.max_file_size_bytes()).unwrap_or(usize::MAX);
    max.saturating_mul(4) / 3 + 64 * 1024
}

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config)?;

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(10_000)
        .max(1);
    tracing::info!(http_concurrency_limit, "HTTP concurrency limit layer enabled");

    let app = Router::new()
        .route(
            "/intake/initiate-upload",
            post(handlers::intake::initiate_upload),
        )
        .route("/intake/upload/{qid}", put(handlers::intake::upload_bytes))
        .route(
            "/intake/complete-upload",
            post(handlers::intake::complete_upload),
        )
        .route("/intake/status/{qid}", get(handlers::intake::get_status))
        .route("/intake/history/{qid}", get(handlers::intake::get_history))
        .route(
            "/intake/retry/{qid}",
            post(handlers::intake::retry_processing),
        )
        .route("/intake/sessions", post(handlers::sessions::create_session))
        .route("/intake/sessions/{sid}", get(handlers::sessions::get_session))
        .route(
            "/intake/worker-status",
            get(handlers::workers::worker_status),
        )
        .route("/intake/health", get(health::health_check))
        .route(OPENAPI_PATH, get(|| async { Json(api_doc::get_openapi_spec()) }))
        .merge(utoipa_rapidoc::RapiDoc::new(OPENAPI_PATH).path("/docs"))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(RequestBodyLimitLayer::new(body_limit(config)))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}

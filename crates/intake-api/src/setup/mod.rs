//! Application setup and initialization
//!
//! [`initialize_app`] builds everything from configuration. [`build_app`]
//! takes already-built stores, storage and engines so tests can assemble an
//! app around in-memory backends.

pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use intake_core::Config;
use intake_db::{create_stores, Stores};
use intake_services::Engines;
use intake_storage::IntakeStorage;

use crate::state::AppState;

pub use services::BackgroundTasks;

pub struct App {
    pub state: Arc<AppState>,
    pub router: Router,
    pub background: BackgroundTasks,
}

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<App> {
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.log_json());
    tracing::info!(
        environment = %config.environment(),
        record_store = ?config.record_store(),
        storage = ?config.storage_backend(),
        "Configuration loaded and validated successfully"
    );

    let stores = create_stores(&config).await?;
    let storage = storage::setup_storage(&config).await?;
    let engines = Engines::from_config(&config).context("Failed to build pipeline engines")?;

    build_app(config, stores, storage, engines).await
}

/// Start the pipeline around the given backends and build the router.
pub async fn build_app(
    config: Config,
    stores: Stores,
    storage: IntakeStorage,
    engines: Engines,
) -> Result<App> {
    let (state, background) =
        services::initialize_services(&config, stores, storage, engines).await?;
    let router = routes::setup_routes(&config, state.clone())?;

    Ok(App {
        state,
        router,
        background,
    })
}

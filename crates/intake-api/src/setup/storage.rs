//! Storage setup and initialization

use anyhow::{Context, Result};
use intake_core::Config;
use intake_storage::{create_intake_storage, IntakeStorage};

/// Build the intake storage and round-trip a probe object through it, so a
/// misconfigured bucket or path fails at startup rather than on first upload.
pub async fn setup_storage(config: &Config) -> Result<IntakeStorage> {
    tracing::info!("Initializing storage...");
    let storage = create_intake_storage(config)
        .await
        .context("Failed to create storage backend")?;

    storage
        .probe()
        .await
        .context("Storage backend failed its startup probe")?;

    tracing::info!(backend = ?storage.backend_type(), "Storage initialized successfully");
    Ok(storage)
}

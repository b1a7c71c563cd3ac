//! Database setup and backend selection

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use intake_core::{Config, RecordStoreBackend};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::memory::{MemoryIntakeRecordStore, MemorySessionStore};
use crate::postgres::{PgIntakeRecordStore, PgSessionStore};
use crate::store::{IntakeRecordStore, SessionStore};

/// Record and session stores sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<dyn IntakeRecordStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Stores {
            records: Arc::new(MemoryIntakeRecordStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Stores {
            records: Arc::new(PgIntakeRecordStore::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool)),
        }
    }
}

/// Connect a pool and apply pending migrations from the workspace `migrations/` directory.
pub async fn connect_and_migrate(
    database_url: &str,
    max_connections: u32,
    timeout_seconds: u64,
) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(max_connections, "Database connected successfully");

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    let url = config
        .database_url()
        .context("DATABASE_URL is required for the postgres record store")?;
    connect_and_migrate(url, config.db_max_connections(), config.db_timeout_seconds()).await
}

/// Build the stores selected by `RECORD_STORE_BACKEND`.
pub async fn create_stores(config: &Config) -> Result<Stores> {
    match config.record_store() {
        RecordStoreBackend::Postgres => {
            let pool = setup_database(config).await?;
            Ok(Stores::postgres(pool))
        }
        RecordStoreBackend::Memory => {
            tracing::warn!("Using in-memory record store; intake state is lost on restart");
            Ok(Stores::memory())
        }
    }
}

//! Pipeline wiring: event bus, stage workers, sweeps and the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use intake_core::Config;
use intake_db::Stores;
use intake_processing::FileValidator;
use intake_services::{Engines, RetentionService};
use intake_storage::IntakeStorage;
use intake_worker::{EventBus, PipelineContext, SessionManager, StaleSweeper, WorkerConfig, WorkerPool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::IntakeOrchestrator;
use crate::state::AppState;

/// Long-running tasks owned by the process, stopped after the server exits.
pub struct BackgroundTasks {
    pub workers: Arc<WorkerPool>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Cancel the sweeps, then drain the worker pool for up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.workers.shutdown(grace).await;
    }
}

/// Start the pipeline and build the shared application state.
pub async fn initialize_services(
    config: &Config,
    stores: Stores,
    storage: IntakeStorage,
    engines: Engines,
) -> Result<(Arc<AppState>, BackgroundTasks)> {
    let worker_config = WorkerConfig::from_config(config);
    let bus = EventBus::new(worker_config.queue_capacity);
    let sessions = SessionManager::new(stores.sessions.clone(), config.session_ttl_minutes());
    let shutdown = CancellationToken::new();

    let context = PipelineContext {
        records: stores.records.clone(),
        sessions: sessions.clone(),
        storage: storage.clone(),
        engines,
        bus: bus.clone(),
    };
    let workers = Arc::new(WorkerPool::new(&context, &worker_config, shutdown.child_token()));
    workers.start().await?;

    let mut handles = Vec::new();

    let sweeper = Arc::new(StaleSweeper::new(
        stores.records.clone(),
        bus.clone(),
        worker_config.clone(),
    ));
    if let Some(handle) = sweeper.start(shutdown.child_token()) {
        handles.push(handle);
    }

    let retention_interval = config.retention_sweep_interval_secs();
    if retention_interval > 0 {
        let retention = Arc::new(RetentionService::new(
            stores.records.clone(),
            stores.sessions.clone(),
            storage.clone(),
            config.archive_retention_days(),
            Duration::from_secs(retention_interval),
        ));
        handles.push(retention.start(shutdown.child_token()));
        tracing::info!(
            retention_days = config.archive_retention_days(),
            interval_secs = retention_interval,
            "Retention sweep started"
        );
    } else {
        tracing::info!("Retention sweep disabled");
    }

    let orchestrator = IntakeOrchestrator::new(
        stores.records.clone(),
        storage.clone(),
        Arc::new(FileValidator::from_config(config)),
        bus.clone(),
        sessions.clone(),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator,
        sessions,
        records: stores.records,
        storage,
        bus,
        workers: workers.clone(),
    });

    let background = BackgroundTasks {
        workers,
        shutdown,
        handles,
    };
    Ok((state, background))
}

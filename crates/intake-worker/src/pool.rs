//! Stage worker pool.
//!
//! One dispatcher task per stage drains that stage's queue and runs up to
//! `concurrency` workers at once. Shutdown: [`WorkerPool::shutdown`] cancels
//! the dispatchers, then waits a bounded time for in-flight work.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use intake_core::models::{StageWorkerStatus, WorkerStatusResponse};
use intake_core::{PipelineStage, StageRequest};
use intake_db::IntakeRecordStore;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::runner::{ProcessOutcome, RetryPolicy, StageWorker};
use crate::stages::{build_handlers, StageHandler};

#[derive(Default)]
struct StageStats {
    active: AtomicUsize,
    processed: AtomicU64,
    advanced: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl StageStats {
    fn record(&self, result: &Result<ProcessOutcome>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(ProcessOutcome::Advanced) => &self.advanced,
            Ok(ProcessOutcome::Discarded) => &self.discarded,
            Ok(ProcessOutcome::Failed) | Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct StageSlot {
    worker: Arc<StageWorker>,
    semaphore: Arc<Semaphore>,
    stats: Arc<StageStats>,
}

pub struct WorkerPool {
    bus: EventBus,
    records: Arc<dyn IntakeRecordStore>,
    slots: BTreeMap<PipelineStage, StageSlot>,
    max_workers: usize,
    shutdown: CancellationToken,
    started: AtomicBool,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(context: &PipelineContext, config: &WorkerConfig, shutdown: CancellationToken) -> Self {
        let handlers = build_handlers(&context.storage, &context.engines);
        Self::with_handlers(context, config, handlers, shutdown)
    }

    /// Build a pool around explicit handlers; later handlers for the same
    /// stage replace earlier ones.
    pub fn with_handlers(
        context: &PipelineContext,
        config: &WorkerConfig,
        handlers: Vec<Arc<dyn StageHandler>>,
        shutdown: CancellationToken,
    ) -> Self {
        let max_workers = config.concurrency.max(1);
        let slots = handlers
            .into_iter()
            .map(|handler| {
                let stage = handler.stage();
                let worker = StageWorker::new(
                    handler,
                    context.records.clone(),
                    context.sessions.clone(),
                    context.bus.clone(),
                    RetryPolicy {
                        max_retries: config.max_retries,
                        retry_delay: config.retry_delay,
                        timeout: config.timeout_for(stage),
                        finalize_max_attempts: config.finalize_max_attempts,
                    },
                );
                let slot = StageSlot {
                    worker: Arc::new(worker),
                    semaphore: Arc::new(Semaphore::new(max_workers)),
                    stats: Arc::new(StageStats::default()),
                };
                (stage, slot)
            })
            .collect();

        Self {
            bus: context.bus.clone(),
            records: context.records.clone(),
            slots,
            max_workers,
            shutdown,
            started: AtomicBool::new(false),
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Take every stage queue from the bus and spawn its dispatcher.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("Worker pool already started");
        }

        let mut dispatchers = self.dispatchers.lock().await;
        for (stage, slot) in &self.slots {
            let rx = self
                .bus
                .take_receiver(*stage)
                .await
                .with_context(|| format!("{} queue already has a consumer", stage))?;

            dispatchers.push(tokio::spawn(dispatch(
                *stage,
                rx,
                slot.worker.clone(),
                slot.semaphore.clone(),
                slot.stats.clone(),
                self.shutdown.clone(),
            )));
        }

        tracing::info!(
            stages = self.slots.len(),
            max_workers = self.max_workers,
            queue_capacity = self.bus.capacity(),
            "Stage worker pool started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    pub async fn status(&self) -> WorkerStatusResponse {
        let stages = self
            .slots
            .iter()
            .map(|(stage, slot)| StageWorkerStatus {
                stage: *stage,
                queue_depth: self.bus.queue_depth(*stage),
                queue_capacity: self.bus.capacity(),
                active_workers: slot.stats.active.load(Ordering::Relaxed),
                max_workers: self.max_workers,
                processed: slot.stats.processed.load(Ordering::Relaxed),
                advanced: slot.stats.advanced.load(Ordering::Relaxed),
                discarded: slot.stats.discarded.load(Ordering::Relaxed),
                failed: slot.stats.failed.load(Ordering::Relaxed),
            })
            .collect();

        let records_by_status = match self.records.count_by_status().await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count records by status");
                BTreeMap::new()
            }
        };

        WorkerStatusResponse {
            running: self.is_running(),
            stages,
            records_by_status,
        }
    }

    /// Stop dispatching and wait up to `grace` for in-flight stages.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown.cancel();

        let dispatchers: Vec<_> = self.dispatchers.lock().await.drain(..).collect();
        for handle in dispatchers {
            let _ = handle.await;
        }

        let drain = async {
            for (stage, slot) in &self.slots {
                if slot
                    .semaphore
                    .acquire_many(self.max_workers as u32)
                    .await
                    .is_err()
                {
                    tracing::debug!(stage = %stage, "Stage semaphore closed");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "In-flight stages still running at shutdown"
            );
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn dispatch(
    stage: PipelineStage,
    mut rx: mpsc::Receiver<StageRequest>,
    worker: Arc<StageWorker>,
    semaphore: Arc<Semaphore>,
    stats: Arc<StageStats>,
    shutdown: CancellationToken,
) {
    tracing::debug!(stage = %stage, "Stage dispatcher started");

    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let worker = worker.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            stats.active.fetch_add(1, Ordering::Relaxed);
            let result = worker.run(request.qid).await;
            stats.active.fetch_sub(1, Ordering::Relaxed);

            if let Err(e) = &result {
                tracing::error!(
                    error = %e,
                    qid = %request.qid,
                    stage = %stage,
                    origin = ?request.origin,
                    "Stage processing failed"
                );
            }
            stats.record(&result);
        });
    }

    tracing::debug!(stage = %stage, "Stage dispatcher stopped");
}

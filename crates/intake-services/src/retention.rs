//! Archive retention sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use intake_core::models::meta;
use intake_core::{IntakeStatus, RecordUpdate};
use intake_db::{IntakeRecordStore, SessionStore};
use intake_storage::IntakeStorage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: usize,
    pub failed: usize,
    pub sessions_expired: u64,
}

/// Deletes archived blobs past retention and expires idle sessions.
#[derive(Clone)]
pub struct RetentionService {
    records: Arc<dyn IntakeRecordStore>,
    sessions: Arc<dyn SessionStore>,
    storage: IntakeStorage,
    /// 0 keeps archives forever; sessions are still expired.
    retention_days: i64,
    sweep_interval: Duration,
}

impl RetentionService {
    pub fn new(
        records: Arc<dyn IntakeRecordStore>,
        sessions: Arc<dyn SessionStore>,
        storage: IntakeStorage,
        retention_days: i64,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            records,
            sessions,
            storage,
            retention_days,
            sweep_interval,
        }
    }

    /// Start the background sweep. Returns a JoinHandle for graceful shutdown.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Retention sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_once(Utc::now()).await;
                        if report != RetentionReport::default() {
                            tracing::info!(
                                deleted = report.deleted,
                                failed = report.failed,
                                sessions_expired = report.sessions_expired,
                                "Retention sweep completed"
                            );
                        }
                    }
                }
            }
        })
    }

    #[tracing::instrument(skip(self), fields(retention.operation = "sweep"))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> RetentionReport {
        let mut report = RetentionReport::default();

        if self.retention_days > 0 {
            let cutoff = now - ChronoDuration::days(self.retention_days);
            match self
                .records
                .list_stale(&[IntakeStatus::Archived], cutoff, BATCH_SIZE)
                .await
            {
                Ok(expired) => {
                    for record in expired {
                        let archive_key = record
                            .meta_str(meta::ARCHIVE_PATH)
                            .unwrap_or(&record.storage_path)
                            .to_string();

                        if let Err(e) = self.storage.delete(&archive_key).await {
                            tracing::error!(
                                error = %e,
                                qid = %record.qid,
                                storage_key = %archive_key,
                                "Failed to delete archived blob, keeping record"
                            );
                            report.failed += 1;
                            continue;
                        }

                        let update = RecordUpdate::advance(IntakeStatus::Deleted)
                            .note(format!("retention of {} days elapsed", self.retention_days));
                        match self
                            .records
                            .transition(record.qid, IntakeStatus::Archived, update)
                            .await
                        {
                            Ok(Some(_)) => {
                                tracing::info!(
                                    qid = %record.qid,
                                    storage_key = %archive_key,
                                    status = %IntakeStatus::Deleted,
                                    "Archived file deleted by retention"
                                );
                                report.deleted += 1;
                            }
                            Ok(None) => {
                                tracing::debug!(qid = %record.qid, "Record left archived before retention");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, qid = %record.qid, "Failed to mark record deleted");
                                report.failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list expired archives");
                }
            }
        }

        match self.sessions.expire_stale(now).await {
            Ok(count) => report.sessions_expired = count,
            Err(e) => tracing::error!(error = %e, "Failed to expire sessions"),
        }

        report
    }
}

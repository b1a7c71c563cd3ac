//! Stale-record sweep.
//!
//! Stage requests live only in memory, so a crash or a full queue between a
//! commit and its publish would strand the record. The sweep finds records
//! that have not moved for a while and puts them back in front of their
//! stage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use intake_core::models::{meta, RequestOrigin};
use intake_core::{IntakeRecord, IntakeStatus, PipelineEvent, PipelineStage, RecordUpdate};
use intake_db::IntakeRecordStore;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::WorkerConfig;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Waiting records whose stage request was published again.
    pub requeued: usize,
    /// Claims released back to their precondition and requeued.
    pub released: usize,
    /// `finalize_failed` records reset to `completed` for another attempt.
    pub finalize_retried: usize,
    /// `finalize_failed` records that used up their attempts.
    pub exhausted: usize,
}

pub struct StaleSweeper {
    records: Arc<dyn IntakeRecordStore>,
    bus: EventBus,
    config: WorkerConfig,
}

impl StaleSweeper {
    pub fn new(records: Arc<dyn IntakeRecordStore>, bus: EventBus, config: WorkerConfig) -> Self {
        Self {
            records,
            bus,
            config,
        }
    }

    /// Start the background sweep, or return `None` when it is disabled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.stale_sweep_interval.is_zero() {
            tracing::info!("Stale sweep disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = interval(self.config.stale_sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Stale sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_once(Utc::now()).await;
                        if report != SweepReport::default() {
                            tracing::info!(
                                requeued = report.requeued,
                                released = report.released,
                                finalize_retried = report.finalize_retried,
                                exhausted = report.exhausted,
                                "Stale sweep completed"
                            );
                        }
                    }
                }
            }
        }))
    }

    /// A claim is stale only once its worker has certainly given up: every
    /// attempt timed out and every retry delay elapsed.
    fn claim_threshold(&self, stage: PipelineStage) -> ChronoDuration {
        let attempts = self.config.max_retries.saturating_add(1);
        let worst_case = (self.config.timeout_for(stage) + self.config.retry_delay) * attempts;
        let worst_case_secs = i64::try_from(worst_case.as_secs()).unwrap_or(i64::MAX);
        ChronoDuration::seconds(self.config.stale_threshold_secs.max(worst_case_secs))
    }

    #[tracing::instrument(skip(self), fields(sweep.operation = "stale"))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = now - ChronoDuration::seconds(self.config.stale_threshold_secs);

        let waiting: Vec<IntakeStatus> = PipelineStage::ALL
            .iter()
            .map(PipelineStage::precondition)
            .collect();
        for record in self.list(&waiting, cutoff).await {
            if let Some(stage) = PipelineStage::waiting_on(record.status) {
                tracing::debug!(qid = %record.qid, status = %record.status, "Requeueing idle record");
                if self.requeue(stage, &record).await {
                    report.requeued += 1;
                }
            }
        }

        for stage in PipelineStage::ALL {
            let Some(claim) = stage.claim_status() else {
                continue;
            };
            let claim_cutoff = now - self.claim_threshold(stage);
            for record in self.list(&[claim], claim_cutoff).await {
                if self.release_claim(stage, claim, &record).await {
                    report.released += 1;
                }
            }
        }

        for record in self.list(&[IntakeStatus::FinalizeFailed], cutoff).await {
            let attempts = record.meta_u64(meta::FINALIZE_ATTEMPTS).unwrap_or(0);
            if attempts >= u64::from(self.config.finalize_max_attempts) {
                tracing::debug!(qid = %record.qid, attempts, "Finalize attempts exhausted");
                report.exhausted += 1;
                continue;
            }
            if self.retry_finalize(&record, attempts).await {
                report.finalize_retried += 1;
            }
        }

        report
    }

    async fn list(&self, statuses: &[IntakeStatus], older_than: DateTime<Utc>) -> Vec<IntakeRecord> {
        match self.records.list_stale(statuses, older_than, BATCH_SIZE).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, statuses = ?statuses, "Failed to list stale records");
                Vec::new()
            }
        }
    }

    async fn release_claim(
        &self,
        stage: PipelineStage,
        claim: IntakeStatus,
        record: &IntakeRecord,
    ) -> bool {
        let update = RecordUpdate::advance(stage.precondition())
            .stage(stage)
            .note("stale claim released");
        match self.records.transition(record.qid, claim, update).await {
            Ok(Some(released)) => {
                tracing::info!(
                    qid = %released.qid,
                    from = %claim,
                    status = %released.status,
                    "Stale claim released"
                );
                self.requeue(stage, &released).await
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, qid = %record.qid, "Failed to release stale claim");
                false
            }
        }
    }

    async fn retry_finalize(&self, record: &IntakeRecord, attempts: u64) -> bool {
        let update = RecordUpdate::advance(IntakeStatus::Completed)
            .stage(PipelineStage::Finalize)
            .remove_meta(meta::FAILED_STAGE)
            .note(format!("finalize re-attempt after {} failure(s)", attempts));
        match self
            .records
            .transition(record.qid, IntakeStatus::FinalizeFailed, update)
            .await
        {
            Ok(Some(reset)) => {
                tracing::info!(
                    qid = %reset.qid,
                    attempts,
                    status = %reset.status,
                    "Finalize re-attempt scheduled"
                );
                self.requeue(PipelineStage::Finalize, &reset).await
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, qid = %record.qid, "Failed to reset finalize_failed record");
                false
            }
        }
    }

    async fn requeue(&self, stage: PipelineStage, record: &IntakeRecord) -> bool {
        let event = PipelineEvent::stage_requested(stage, record.qid, RequestOrigin::Sweep);
        match self.bus.publish(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, qid = %record.qid, stage = %stage, "Failed to requeue record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::models::NewIntakeRecord;
    use intake_core::{IntakeSource, Qid};
    use intake_db::MemoryIntakeRecordStore;
    use serde_json::Value;

    fn sweeper(records: Arc<MemoryIntakeRecordStore>) -> (StaleSweeper, EventBus) {
        let bus = EventBus::new(16);
        let config = WorkerConfig {
            max_retries: 1,
            retry_delay: Duration::from_secs(1),
            stale_threshold_secs: 300,
            finalize_max_attempts: 2,
            ..WorkerConfig::default()
        };
        (StaleSweeper::new(records, bus.clone(), config), bus)
    }

    async fn record_in(
        records: &MemoryIntakeRecordStore,
        status: IntakeStatus,
        updated_at: DateTime<Utc>,
        metadata: &[(&str, Value)],
    ) -> Qid {
        let mut record = IntakeRecord::new(
            NewIntakeRecord {
                qid: Qid::generate(),
                sid: None,
                source: IntakeSource::Email,
                user_id: None,
                original_filename: "cv.pdf".to_string(),
                storage_path: "sanitized/x/cv.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                file_size: 10,
            },
            updated_at,
        );
        record.status = status;
        if status.is_failure() {
            record.error_message = Some("boom".to_string());
        }
        for (key, value) in metadata {
            record.metadata.insert(key.to_string(), value.clone());
        }
        records.insert(&record).await.unwrap();
        record.qid
    }

    #[tokio::test]
    async fn test_idle_waiting_record_is_requeued() {
        let records = Arc::new(MemoryIntakeRecordStore::new());
        let (sweeper, bus) = sweeper(records.clone());
        let now = Utc::now();

        let idle = record_in(&records, IntakeStatus::Sanitized, now - ChronoDuration::minutes(10), &[]).await;
        record_in(&records, IntakeStatus::Sanitized, now - ChronoDuration::seconds(10), &[]).await;
        record_in(&records, IntakeStatus::Archived, now - ChronoDuration::days(1), &[]).await;

        let report = sweeper.run_once(now).await;
        assert_eq!(report.requeued, 1);

        let mut rx = bus.take_receiver(PipelineStage::Extract).await.unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request.qid, idle);
        assert_eq!(request.origin, RequestOrigin::Sweep);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_claim_is_released() {
        let records = Arc::new(MemoryIntakeRecordStore::new());
        let (sweeper, bus) = sweeper(records.clone());
        let now = Utc::now();

        let stuck = record_in(&records, IntakeStatus::Parsing, now - ChronoDuration::hours(1), &[]).await;
        // Still within (timeout + delay) * attempts of its claim.
        let busy = record_in(&records, IntakeStatus::Parsing, now - ChronoDuration::seconds(90), &[]).await;

        let report = sweeper.run_once(now).await;
        assert_eq!(report.released, 1);
        assert_eq!(
            records.get(stuck).await.unwrap().unwrap().status,
            IntakeStatus::Extracted
        );
        assert_eq!(
            records.get(busy).await.unwrap().unwrap().status,
            IntakeStatus::Parsing
        );
        assert_eq!(bus.queue_depth(PipelineStage::Parse), 1);
    }

    #[tokio::test]
    async fn test_finalize_failed_retried_until_exhausted() {
        let records = Arc::new(MemoryIntakeRecordStore::new());
        let (sweeper, bus) = sweeper(records.clone());
        let now = Utc::now();
        let old = now - ChronoDuration::minutes(30);

        let retry = record_in(
            &records,
            IntakeStatus::FinalizeFailed,
            old,
            &[(meta::FINALIZE_ATTEMPTS, Value::from(1u64))],
        )
        .await;
        let exhausted = record_in(
            &records,
            IntakeStatus::FinalizeFailed,
            old,
            &[(meta::FINALIZE_ATTEMPTS, Value::from(2u64))],
        )
        .await;

        let report = sweeper.run_once(now).await;
        assert_eq!(report.finalize_retried, 1);
        assert_eq!(report.exhausted, 1);

        let reset = records.get(retry).await.unwrap().unwrap();
        assert_eq!(reset.status, IntakeStatus::Completed);
        assert!(reset.error_message.is_none());
        assert_eq!(
            records.get(exhausted).await.unwrap().unwrap().status,
            IntakeStatus::FinalizeFailed
        );
        assert_eq!(bus.queue_depth(PipelineStage::Finalize), 1);
    }
}

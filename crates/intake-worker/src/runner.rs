//! Generic stage worker.
//!
//! `process(qid)`: load → precondition check → claim → attempts under a
//! timeout with a fixed retry delay → conditional commit → publish. Workers
//! keep no state between calls; the record store is the only truth.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use intake_core::models::{meta, FileInfected, IntakeArchived, ProcessingFailed, RequestOrigin};
use intake_core::{
    IntakeRecord, IntakeStatus, PipelineError, PipelineEvent, PipelineStage, Qid, RecordUpdate,
    TaskError,
};
use intake_db::{IntakeRecordStore, StoreError};

use crate::bus::EventBus;
use crate::sessions::SessionManager;
use crate::stages::{StageHandler, StageOutput};

/// What one `process` call did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The stage succeeded and the record moved to its success status.
    Advanced,
    /// The stage failed and the failure was recorded.
    Failed,
    /// The record was not in the stage's precondition (duplicate or stale
    /// request), or another worker won the commit.
    Discarded,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Finalize failures count against the session once this many have accrued.
    pub finalize_max_attempts: u32,
}

pub struct StageWorker {
    handler: Arc<dyn StageHandler>,
    records: Arc<dyn IntakeRecordStore>,
    sessions: SessionManager,
    bus: EventBus,
    policy: RetryPolicy,
}

impl StageWorker {
    pub fn new(
        handler: Arc<dyn StageHandler>,
        records: Arc<dyn IntakeRecordStore>,
        sessions: SessionManager,
        bus: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            handler,
            records,
            sessions,
            bus,
            policy,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.handler.stage()
    }

    /// Returns `false` when the request was discarded without touching the record.
    pub async fn process(&self, qid: Qid) -> Result<bool> {
        Ok(self.run(qid).await? != ProcessOutcome::Discarded)
    }

    #[tracing::instrument(skip(self), fields(stage = %self.stage()))]
    pub async fn run(&self, qid: Qid) -> Result<ProcessOutcome> {
        let stage = self.stage();
        let precondition = stage.precondition();

        let Some(record) = self.records.get(qid).await? else {
            tracing::debug!(qid = %qid, "Record not found, discarding request");
            return Ok(ProcessOutcome::Discarded);
        };
        if record.status != precondition {
            tracing::debug!(
                qid = %qid,
                status = %record.status,
                expected = %precondition,
                "Precondition not met, discarding request"
            );
            return Ok(ProcessOutcome::Discarded);
        }

        let (record, held) = match stage.claim_status() {
            Some(claim) => {
                let update = RecordUpdate::advance(claim).stage(stage).note("claimed");
                match self.records.transition(qid, precondition, update).await? {
                    Some(claimed) => {
                        tracing::info!(qid = %qid, status = %claim, "Record claimed");
                        (claimed, claim)
                    }
                    None => {
                        tracing::debug!(qid = %qid, "Claim lost to another worker, discarding request");
                        return Ok(ProcessOutcome::Discarded);
                    }
                }
            }
            None => (record, precondition),
        };

        let started = Instant::now();
        match self.attempt(&record).await {
            Ok(output) => match self.commit(&record, held, output, started).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    tracing::warn!(qid = %qid, error = %e, "Failed to commit stage result");
                    let err = TaskError::recoverable(PipelineError::Record(e.to_string()));
                    self.fail(&record, held, err, started).await
                }
            },
            Err(err) => self.fail(&record, held, err, started).await,
        }
    }

    /// Run the handler with the stage timeout, retrying recoverable errors.
    async fn attempt(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let stage = self.stage();
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.timeout, self.handler.run(record)).await
            {
                Ok(result) => result,
                Err(_) => Err(TaskError::recoverable(PipelineError::Timeout {
                    stage,
                    secs: self.policy.timeout.as_secs(),
                })),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    tracing::warn!(
                        qid = %record.qid,
                        error = %e,
                        attempt,
                        max_attempts,
                        retry_delay_ms = self.policy.retry_delay.as_millis() as u64,
                        "Stage attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(e) => {
                    if e.is_recoverable() {
                        tracing::warn!(qid = %record.qid, error = %e, attempt, "Stage retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn commit(
        &self,
        record: &IntakeRecord,
        held: IntakeStatus,
        output: StageOutput,
        started: Instant,
    ) -> Result<ProcessOutcome, StoreError> {
        let stage = self.stage();
        let update = output.update.stage(stage);

        let Some(updated) = self.records.transition(record.qid, held, update).await? else {
            tracing::warn!(
                qid = %record.qid,
                expected = %held,
                "Record moved while the stage was running, result dropped"
            );
            return Ok(ProcessOutcome::Discarded);
        };

        tracing::info!(
            qid = %updated.qid,
            from = %held,
            status = %updated.status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Stage completed"
        );

        self.handler.on_committed(record, &updated).await;

        match stage.next() {
            Some(next) => {
                self.publish(PipelineEvent::stage_requested(
                    next,
                    updated.qid,
                    RequestOrigin::Pipeline,
                ))
                .await;
            }
            None => {
                self.publish(PipelineEvent::IntakeArchived(IntakeArchived {
                    qid: updated.qid,
                    profile_id: updated.profile_id.clone(),
                    archive_path: updated.storage_path.clone(),
                    at: Utc::now(),
                }))
                .await;
                self.settle_session(&updated, true).await;
            }
        }

        Ok(ProcessOutcome::Advanced)
    }

    async fn fail(
        &self,
        record: &IntakeRecord,
        held: IntakeStatus,
        err: TaskError,
        started: Instant,
    ) -> Result<ProcessOutcome> {
        let stage = self.stage();
        let error = err.into_inner();
        let message = error.to_string();

        let status = match &error {
            PipelineError::Infected { .. } => IntakeStatus::Infected,
            _ => stage.failure_status(),
        };

        let mut update = RecordUpdate::fail(status, message.clone())
            .stage(stage)
            .set_meta(meta::FAILED_STAGE, stage.as_str());
        if let PipelineError::Infected { virus_name } = &error {
            update = update.set_meta(meta::VIRUS_NAME, virus_name.clone());
        }
        // Counted failures are flagged so a retry can take them back out.
        let mut settles = matches!(status, IntakeStatus::Infected | IntakeStatus::Failed);
        if status == IntakeStatus::FinalizeFailed {
            let attempts = record.meta_u64(meta::FINALIZE_ATTEMPTS).unwrap_or(0) + 1;
            update = update
                .set_meta(meta::FINALIZE_ATTEMPTS, attempts)
                .set_meta(meta::FINALIZE_ERROR, message.clone());
            settles = attempts >= u64::from(self.policy.finalize_max_attempts.max(1));
        }
        if settles && record.sid.is_some() {
            update = update.set_meta(meta::SESSION_COUNTED, true);
        }

        let Some(updated) = self.records.transition(record.qid, held, update).await? else {
            tracing::warn!(
                qid = %record.qid,
                expected = %held,
                error = %message,
                "Record moved while the stage was running, failure dropped"
            );
            return Ok(ProcessOutcome::Discarded);
        };

        tracing::warn!(
            qid = %updated.qid,
            from = %held,
            status = %updated.status,
            error = %message,
            duration_ms = started.elapsed().as_millis() as u64,
            "Stage failed"
        );

        self.publish(PipelineEvent::ProcessingFailed(ProcessingFailed {
            qid: updated.qid,
            stage,
            error: message,
            retryable: error.is_retryable(),
            at: Utc::now(),
        }))
        .await;

        if let PipelineError::Infected { virus_name } = error {
            self.publish(PipelineEvent::FileInfected(FileInfected {
                qid: updated.qid,
                virus_name,
                at: Utc::now(),
            }))
            .await;
        }

        if settles {
            self.settle_session(&updated, false).await;
        }

        Ok(ProcessOutcome::Failed)
    }

    /// A lost publish is recovered by the stale sweep.
    async fn publish(&self, event: PipelineEvent) {
        let qid = event.qid();
        let kind = event.kind();
        if let Err(e) = self.bus.publish(event).await {
            tracing::warn!(error = %e, qid = %qid, event = kind, "Failed to publish event");
        }
    }

    async fn settle_session(&self, record: &IntakeRecord, success: bool) {
        let Some(sid) = record.sid else {
            return;
        };
        if let Err(e) = self.sessions.record_outcome(sid, success).await {
            tracing::warn!(error = %e, qid = %record.qid, sid = %sid, "Failed to update session");
        }
    }
}

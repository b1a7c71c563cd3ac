use std::sync::Arc;

use async_trait::async_trait;
use intake_core::models::meta;
use intake_core::{IntakeRecord, IntakeStatus, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_services::{IntakeNotification, Notifier, ProfileCreator};
use intake_storage::{IntakeStorage, StorageArea};
use serde_json::Value;

use super::{storage_failure, verify_blob, StageHandler, StageOutput};

pub const ARCHIVED_EVENT: &str = "intake.archived";

/// Archives the sanitized file, creates the downstream profile and notifies.
///
/// Archival is at-least-once: the copy goes to a deterministic key and is
/// re-verified by hash on every attempt, and only the `archived` commit marks
/// it done. Parse output is never touched here.
pub struct FinalizeStage {
    storage: IntakeStorage,
    profiles: Arc<dyn ProfileCreator>,
    notifier: Arc<dyn Notifier>,
}

impl FinalizeStage {
    pub fn new(
        storage: IntakeStorage,
        profiles: Arc<dyn ProfileCreator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            profiles,
            notifier,
        }
    }
}

#[async_trait]
impl StageHandler for FinalizeStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Finalize
    }

    #[tracing::instrument(skip(self, record), fields(qid = %record.qid, stage = "finalize"))]
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let archive_key = self
            .storage
            .put_archive(record.qid, &record.storage_path)
            .await
            .map_err(storage_failure)?;

        if let Some(expected) = record.expected_blob_hash() {
            let archived = self
                .storage
                .get(&archive_key)
                .await
                .map_err(storage_failure)?;
            verify_blob(expected, &archived)?;
        }

        let parsed = record.parsed_output.clone().unwrap_or(Value::Null);
        let profile_id = self
            .profiles
            .create_profile(record, &parsed)
            .await
            .map_err(|e| match e {
                PipelineError::Finalize(_) => TaskError::recoverable(e),
                other => TaskError::from(other),
            })?;

        let mut update = RecordUpdate::advance(IntakeStatus::Archived)
            .storage_path(archive_key.clone())
            .set_meta(meta::ARCHIVE_PATH, archive_key)
            .remove_meta(meta::FINALIZE_ERROR);
        if let Some(id) = profile_id {
            update = update.profile_id(id);
        }

        Ok(StageOutput::new(update))
    }

    async fn on_committed(&self, before: &IntakeRecord, after: &IntakeRecord) {
        if StorageArea::of(&before.storage_path) == Some(StorageArea::Sanitized) {
            if let Err(e) = self.storage.delete(&before.storage_path).await {
                tracing::warn!(
                    error = %e,
                    qid = %before.qid,
                    storage_key = %before.storage_path,
                    "Failed to remove sanitized copy after archival"
                );
            }
        }

        let notification = IntakeNotification::from_record(ARCHIVED_EVENT, after);
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(error = %e, qid = %after.qid, "Completion notification failed");
        }
    }
}

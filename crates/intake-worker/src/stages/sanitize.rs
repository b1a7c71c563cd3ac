use async_trait::async_trait;
use intake_core::models::meta;
use intake_core::{IntakeRecord, IntakeStatus, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_processing::{sha256_hex, ContentSanitizer};
use intake_storage::{IntakeStorage, StorageArea};

use super::{read_verified, storage_failure, StageHandler, StageOutput};

pub struct SanitizeStage {
    storage: IntakeStorage,
    sanitizer: ContentSanitizer,
}

impl SanitizeStage {
    pub fn new(storage: IntakeStorage, sanitizer: ContentSanitizer) -> Self {
        Self { storage, sanitizer }
    }
}

#[async_trait]
impl StageHandler for SanitizeStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Sanitize
    }

    #[tracing::instrument(skip(self, record), fields(qid = %record.qid, stage = "sanitize"))]
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let data = read_verified(
            &self.storage,
            &record.storage_path,
            record.content_hash.as_deref(),
        )
        .await?;

        let sanitized = self
            .sanitizer
            .sanitize(&record.original_filename, &record.mime_type, data)
            .map_err(|e| TaskError::unrecoverable(PipelineError::Sanitization(e.to_string())))?;

        let sanitized_hash = sha256_hex(&sanitized.bytes);
        let size_bytes = sanitized.bytes.len();
        let key = self
            .storage
            .put_sanitized(
                record.qid,
                &sanitized.filename,
                &record.mime_type,
                sanitized.bytes,
            )
            .await
            .map_err(storage_failure)?;

        tracing::debug!(
            storage_key = %key,
            size_bytes,
            modified = !sanitized.report.is_empty(),
            "Sanitized copy written"
        );

        Ok(StageOutput::new(
            RecordUpdate::advance(IntakeStatus::Sanitized)
                .storage_path(key)
                .sanitized_filename(sanitized.filename)
                .set_meta(meta::SANITIZED_HASH, sanitized_hash)
                .set_meta(meta::SANITIZE_REPORT, sanitized.report),
        ))
    }

    async fn on_committed(&self, before: &IntakeRecord, _after: &IntakeRecord) {
        if StorageArea::of(&before.storage_path) != Some(StorageArea::Quarantine) {
            return;
        }
        if let Err(e) = self.storage.delete(&before.storage_path).await {
            tracing::warn!(
                error = %e,
                qid = %before.qid,
                storage_key = %before.storage_path,
                "Failed to remove quarantined original"
            );
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use intake_core::models::meta;
use intake_core::{IntakeRecord, IntakeStatus, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_processing::{ExtractionInput, Extractor};
use intake_storage::IntakeStorage;

use super::{read_verified, StageHandler, StageOutput};

pub struct ExtractStage {
    storage: IntakeStorage,
    extractor: Arc<dyn Extractor>,
}

impl ExtractStage {
    pub fn new(storage: IntakeStorage, extractor: Arc<dyn Extractor>) -> Self {
        Self { storage, extractor }
    }
}

#[async_trait]
impl StageHandler for ExtractStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Extract
    }

    #[tracing::instrument(skip(self, record), fields(qid = %record.qid, stage = "extract", engine = self.extractor.engine_name()))]
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let data = read_verified(
            &self.storage,
            &record.storage_path,
            record.expected_blob_hash(),
        )
        .await?;

        let input = ExtractionInput {
            storage_path: record.storage_path.clone(),
            filename: record
                .sanitized_filename
                .clone()
                .unwrap_or_else(|| record.original_filename.clone()),
            mime_type: record.mime_type.clone(),
            data,
        };

        let extraction = self.extractor.extract(input).await.map_err(|e| {
            let transient = e.is_transient();
            let err = PipelineError::Extraction(e.to_string());
            if transient {
                TaskError::recoverable(err)
            } else {
                TaskError::unrecoverable(err)
            }
        })?;

        // A zero-quality result is a failure, not a degraded success.
        if extraction.quality <= 0.0 || extraction.text.is_empty() {
            return Err(TaskError::unrecoverable(PipelineError::Extraction(format!(
                "no usable text extracted (quality {:.2})",
                extraction.quality
            ))));
        }

        tracing::debug!(
            chars = extraction.text.chars().count(),
            quality = extraction.quality,
            "Text extracted"
        );

        Ok(StageOutput::new(
            RecordUpdate::advance(IntakeStatus::Extracted)
                .extracted_text(extraction.text)
                .set_meta(meta::EXTRACTION_QUALITY, extraction.quality),
        ))
    }
}

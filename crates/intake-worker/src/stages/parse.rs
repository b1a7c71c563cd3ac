use std::sync::Arc;

use async_trait::async_trait;
use intake_core::models::meta;
use intake_core::{IntakeRecord, IntakeStatus, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_processing::{DocumentType, Parser};

use super::{StageHandler, StageOutput};

pub struct ParseStage {
    parser: Arc<dyn Parser>,
}

impl ParseStage {
    pub fn new(parser: Arc<dyn Parser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl StageHandler for ParseStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Parse
    }

    #[tracing::instrument(skip(self, record), fields(qid = %record.qid, stage = "parse", engine = self.parser.engine_name()))]
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let text = record.extracted_text.as_deref().ok_or_else(|| {
            TaskError::unrecoverable(PipelineError::Parsing(
                "record has no extracted text".to_string(),
            ))
        })?;

        let document_type = DocumentType::detect(&record.original_filename, &record.mime_type);
        let outcome = self.parser.parse(text, document_type).await.map_err(|e| {
            let transient = e.is_transient();
            let err = PipelineError::Parsing(e.to_string());
            if transient {
                TaskError::recoverable(err)
            } else {
                TaskError::unrecoverable(err)
            }
        })?;

        tracing::debug!(
            document_type = %document_type,
            confidence = outcome.confidence,
            "Document parsed"
        );

        Ok(StageOutput::new(
            RecordUpdate::advance(IntakeStatus::Completed)
                .parsed_output(outcome.output)
                .set_meta(meta::PARSE_CONFIDENCE, outcome.confidence)
                .set_meta(meta::DOCUMENT_TYPE, document_type.as_str()),
        ))
    }
}

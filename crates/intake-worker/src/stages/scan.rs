use std::sync::Arc;

use async_trait::async_trait;
use intake_core::models::meta;
use intake_core::{IntakeRecord, IntakeStatus, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_services::{CompositeScanner, ScanInput, ScanVerdict, Scanner};
use intake_storage::IntakeStorage;

use super::{read_verified, StageHandler, StageOutput};

pub struct ScanStage {
    storage: IntakeStorage,
    scanner: Arc<CompositeScanner>,
}

impl ScanStage {
    pub fn new(storage: IntakeStorage, scanner: Arc<CompositeScanner>) -> Self {
        Self { storage, scanner }
    }
}

#[async_trait]
impl StageHandler for ScanStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Scan
    }

    #[tracing::instrument(skip(self, record), fields(qid = %record.qid, stage = "scan"))]
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError> {
        let data = read_verified(
            &self.storage,
            &record.storage_path,
            record.content_hash.as_deref(),
        )
        .await?;

        let input = ScanInput {
            storage_path: record.storage_path.clone(),
            data,
        };

        match self.scanner.scan(&input).await {
            ScanVerdict::Clean => {
                let engines = self.scanner.engine_names();
                tracing::debug!(engines = ?engines, "Scan clean");
                Ok(StageOutput::new(
                    RecordUpdate::advance(IntakeStatus::Clean)
                        .set_meta(meta::SCAN_ENGINES, engines),
                ))
            }
            ScanVerdict::Infected { engine, virus_name } => {
                tracing::warn!(engine = %engine, virus_name = %virus_name, "Infected file detected");
                Err(TaskError::unrecoverable(PipelineError::Infected { virus_name }))
            }
            ScanVerdict::Error { engine, reason } => Err(TaskError::recoverable(
                PipelineError::Scan(format!("{}: {}", engine, reason)),
            )),
        }
    }
}

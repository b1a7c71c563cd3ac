//! Per-stage work.
//!
//! A handler computes the record update for its stage from the record it was
//! given and never writes to the record store itself: the [`StageWorker`]
//! owns claiming, retries, timeouts and the conditional commit.
//!
//! [`StageWorker`]: crate::runner::StageWorker

mod extract;
mod finalize;
mod parse;
mod sanitize;
mod scan;

pub use extract::ExtractStage;
pub use finalize::FinalizeStage;
pub use parse::ParseStage;
pub use sanitize::SanitizeStage;
pub use scan::ScanStage;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use intake_core::{IntakeRecord, PipelineError, PipelineStage, RecordUpdate, TaskError};
use intake_processing::{verify_content_hash, ContentSanitizer};
use intake_services::Engines;
use intake_storage::{IntakeStorage, StorageError};

/// Result of one successful stage attempt, not yet persisted.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub update: RecordUpdate,
}

impl StageOutput {
    pub fn new(update: RecordUpdate) -> Self {
        Self { update }
    }
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> PipelineStage;

    /// One attempt at the stage. Called again on recoverable errors.
    async fn run(&self, record: &IntakeRecord) -> Result<StageOutput, TaskError>;

    /// Side effects that must wait until `after` is durably committed.
    /// Failures here are logged, never surfaced.
    async fn on_committed(&self, _before: &IntakeRecord, _after: &IntakeRecord) {}
}

/// The five handlers wired to their engines.
pub fn build_handlers(storage: &IntakeStorage, engines: &Engines) -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(ScanStage::new(storage.clone(), engines.scanner.clone())),
        Arc::new(SanitizeStage::new(storage.clone(), ContentSanitizer::new())),
        Arc::new(ExtractStage::new(storage.clone(), engines.extractor.clone())),
        Arc::new(ParseStage::new(engines.parser.clone())),
        Arc::new(FinalizeStage::new(
            storage.clone(),
            engines.profiles.clone(),
            engines.notifier.clone(),
        )),
    ]
}

/// A missing blob will not reappear, anything else may be a blip.
pub(crate) fn storage_failure(err: StorageError) -> TaskError {
    let missing = matches!(err, StorageError::NotFound(_) | StorageError::InvalidKey(_));
    let err = PipelineError::Storage(err.to_string());
    if missing {
        TaskError::unrecoverable(err)
    } else {
        TaskError::recoverable(err)
    }
}

/// Read the record's current blob and check it against the hash it must have.
pub(crate) async fn read_verified(
    storage: &IntakeStorage,
    storage_path: &str,
    expected_hash: Option<&str>,
) -> Result<Bytes, TaskError> {
    let data = storage.get(storage_path).await.map_err(storage_failure)?;
    if let Some(expected) = expected_hash {
        verify_blob(expected, &data)?;
    }
    Ok(data)
}

pub(crate) fn verify_blob(expected: &str, data: &[u8]) -> Result<(), TaskError> {
    verify_content_hash(expected, data).map_err(|e| match e {
        intake_processing::ValidationError::HashMismatch { expected, actual } => {
            TaskError::unrecoverable(PipelineError::Integrity { expected, actual })
        }
        other => TaskError::unrecoverable(PipelineError::Storage(other.to_string())),
    })
}

//! Intake Core Library
//!
//! This crate provides the domain model, identifiers, configuration and error
//! types shared by every component of the file-intake pipeline.

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{Config, IntakeConfig};
pub use error::{AppError, ErrorMetadata, LogLevel, PipelineError};
pub use ids::{Qid, Sid};
pub use models::{
    IntakeRecord, IntakeSource, IntakeStatus, PipelineEvent, PipelineStage, RecordUpdate,
    StageRequest, StatusTransition,
};
pub use storage_types::{RecordStoreBackend, StorageBackend};
pub use task_error::{TaskError, TaskResultExt};

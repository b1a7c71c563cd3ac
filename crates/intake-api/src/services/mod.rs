//! Services that sit between the HTTP handlers and the pipeline crates.

pub mod orchestrator;

pub use orchestrator::{IntakeError, IntakeOrchestrator, IntakeResult, UploadPayload};

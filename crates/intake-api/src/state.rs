//! Application state shared by every handler.

use std::sync::Arc;

use intake_core::Config;
use intake_db::IntakeRecordStore;
use intake_storage::IntakeStorage;
use intake_worker::{EventBus, SessionManager, WorkerPool};

use crate::services::IntakeOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: IntakeOrchestrator,
    pub sessions: SessionManager,
    pub records: Arc<dyn IntakeRecordStore>,
    pub storage: IntakeStorage,
    pub bus: EventBus,
    pub workers: Arc<WorkerPool>,
}

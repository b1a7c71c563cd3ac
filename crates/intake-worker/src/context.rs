//! Shared dependencies of the stage workers.

use std::sync::Arc;

use intake_db::IntakeRecordStore;
use intake_services::Engines;
use intake_storage::IntakeStorage;

use crate::bus::EventBus;
use crate::sessions::SessionManager;

/// Everything a stage needs, built once at startup and cloned into each
/// worker. Clones share the underlying stores and engines.
#[derive(Clone)]
pub struct PipelineContext {
    pub records: Arc<dyn IntakeRecordStore>,
    pub sessions: SessionManager,
    pub storage: IntakeStorage,
    pub engines: Engines,
    pub bus: EventBus,
}

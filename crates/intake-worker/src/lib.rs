//! Intake Worker Library
//!
//! Asynchronous half of the pipeline. The orchestrator publishes a typed
//! stage request on the [`EventBus`]; one dispatcher per stage pulls requests
//! off its channel and hands them to a [`StageWorker`], which checks the
//! record's precondition, calls the stage's engine with bounded retries,
//! commits the result through a conditional update and only then publishes
//! the next request.
//!
//! Records that stall between "committed" and "published" (crash, full
//! queue, pool restart) are picked up again by the [`StaleSweeper`].

pub mod bus;
pub mod config;
pub mod context;
pub mod pool;
pub mod runner;
pub mod sessions;
pub mod stages;
pub mod sweep;

pub use bus::{BusError, EventBus};
pub use config::WorkerConfig;
pub use context::PipelineContext;
pub use pool::WorkerPool;
pub use runner::{ProcessOutcome, RetryPolicy, StageWorker};
pub use sessions::{SessionError, SessionManager};
pub use stages::{StageHandler, StageOutput};
pub use sweep::{StaleSweeper, SweepReport};

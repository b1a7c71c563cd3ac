//! Intake API
//!
//! HTTP surface of the file-intake pipeline. The [`services::IntakeOrchestrator`]
//! validates and quarantines uploads synchronously; everything after that runs
//! on the stage worker pool started by [`setup::build_app`].

mod api_doc;
pub mod error;
pub mod handlers;
pub mod services;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use setup::{build_app, initialize_app, App, BackgroundTasks};
pub use state::AppState;

//! Data models for the intake pipeline
//!
//! Records and their state machine, sessions, typed pipeline events and the
//! request/response bodies of the orchestrator.

mod api;
mod event;
mod intake;
mod session;

pub use api::*;
pub use event::*;
pub use intake::*;
pub use session::*;

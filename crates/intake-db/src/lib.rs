//! Intake record store
//!
//! The record store is the pipeline's single source of truth: every stage
//! transition is a conditional update keyed on the expected prior status, so
//! duplicate deliveries and concurrent workers can never double-advance a
//! record. Sessions live alongside records in the same backend.
//!
//! Two backends are provided: PostgreSQL (`postgres`) for deployments and an
//! in-memory store (`memory`) for development and tests.

pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryIntakeRecordStore, MemorySessionStore};
pub use pool::{connect_and_migrate, create_stores, setup_database, Stores};
pub use postgres::{PgIntakeRecordStore, PgSessionStore};
pub use store::{IntakeRecordStore, SessionStore};

//! PostgreSQL backend.

mod records;
mod sessions;

pub use records::PgIntakeRecordStore;
pub use sessions::PgSessionStore;

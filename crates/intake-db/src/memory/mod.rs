//! In-memory backend for development and tests.
//!
//! Holds the same semantics as the PostgreSQL backend under a single lock per
//! store: a conditional transition is check-and-apply under that lock.

mod records;
mod sessions;

pub use records::MemoryIntakeRecordStore;
pub use sessions::MemorySessionStore;

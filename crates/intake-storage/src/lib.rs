//! Intake Storage Library
//!
//! Blob storage for the intake pipeline. The `Storage` trait abstracts a
//! key/value blob backend (local filesystem or S3-compatible object storage);
//! `IntakeStorage` layers the pipeline's logical areas on top of it.
//!
//! # Storage key format
//!
//! - Quarantine: `quarantine/{qid}/{filename}`
//! - Sanitized: `sanitized/{qid}/{filename}`
//! - Archive: `archive/{qid}/{filename}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in
//! the `keys` module so all backends stay consistent.

pub mod areas;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use areas::{IntakeStorage, StorageArea};
pub use factory::{create_intake_storage, create_storage};
pub use intake_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};

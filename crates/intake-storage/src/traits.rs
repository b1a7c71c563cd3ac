//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// Backends are addressed purely by key; the pipeline's logical areas are
/// layered on top by [`crate::IntakeStorage`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `storage_key`, replacing any existing object.
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Read the whole object stored under `storage_key`.
    async fn get(&self, storage_key: &str) -> StorageResult<Bytes>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Size in bytes of an existing object.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Server-side copy from one key to another.
    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Generate a presigned PUT URL for direct uploads.
    ///
    /// Only supported by object-store backends; others return a `ConfigError`.
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Generate a presigned/temporary URL for reading an object.
    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

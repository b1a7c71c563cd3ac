//! Logical storage areas of the intake pipeline.
//!
//! Every file lives in exactly one area at a time as far as the pipeline is
//! concerned: raw uploads in quarantine, cleaned content in sanitized, and the
//! retained copy in archive.

use crate::keys::generate_storage_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use intake_core::models::UploadTarget;
use intake_core::Qid;
use std::sync::Arc;
use std::time::Duration;

const PROBE_KEY: &str = "quarantine/.probe/health";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Quarantine,
    Sanitized,
    Archive,
}

impl StorageArea {
    pub fn prefix(&self) -> &'static str {
        match self {
            StorageArea::Quarantine => "quarantine",
            StorageArea::Sanitized => "sanitized",
            StorageArea::Archive => "archive",
        }
    }

    /// Area a storage key belongs to, if any.
    pub fn of(storage_key: &str) -> Option<StorageArea> {
        let prefix = storage_key.split('/').next()?;
        [
            StorageArea::Quarantine,
            StorageArea::Sanitized,
            StorageArea::Archive,
        ]
        .into_iter()
        .find(|area| area.prefix() == prefix)
    }
}

/// Area-aware wrapper around a blob backend.
#[derive(Clone)]
pub struct IntakeStorage {
    backend: Arc<dyn Storage>,
    public_base_url: String,
    presign_expiry_minutes: i64,
}

impl IntakeStorage {
    pub fn new(
        backend: Arc<dyn Storage>,
        public_base_url: String,
        presign_expiry_minutes: i64,
    ) -> Self {
        Self {
            backend,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            presign_expiry_minutes,
        }
    }

    pub fn backend_type(&self) -> StorageBackend {
        self.backend.backend_type()
    }

    /// Key an upload for `qid` lands on in quarantine.
    pub fn quarantine_key(&self, qid: Qid, filename: &str) -> String {
        generate_storage_key(StorageArea::Quarantine.prefix(), qid, filename)
    }

    pub async fn put_quarantine(
        &self,
        qid: Qid,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let key = self.quarantine_key(qid, filename);
        self.backend.put(&key, data, content_type).await?;
        Ok(key)
    }

    pub async fn put_sanitized(
        &self,
        qid: Qid,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let key = generate_storage_key(StorageArea::Sanitized.prefix(), qid, filename);
        self.backend.put(&key, data, content_type).await?;
        Ok(key)
    }

    /// Copy a sanitized object into the archive area and return the archive key.
    ///
    /// The sanitized object is left in place; callers delete it once the
    /// archive has been recorded.
    pub async fn put_archive(&self, qid: Qid, sanitized_key: &str) -> StorageResult<String> {
        if StorageArea::of(sanitized_key) != Some(StorageArea::Sanitized) {
            return Err(StorageError::InvalidKey(format!(
                "Only sanitized objects can be archived: {}",
                sanitized_key
            )));
        }

        let filename = sanitized_key.rsplit('/').next().unwrap_or(sanitized_key);
        let archive_key = generate_storage_key(StorageArea::Archive.prefix(), qid, filename);
        self.backend.copy(sanitized_key, &archive_key).await?;

        tracing::info!(
            qid = %qid,
            from_key = %sanitized_key,
            archive_key = %archive_key,
            "Sanitized file archived"
        );

        Ok(archive_key)
    }

    pub async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        self.backend.get(storage_key).await
    }

    pub async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.backend.delete(storage_key).await
    }

    pub async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.backend.exists(storage_key).await
    }

    pub async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        self.backend.content_length(storage_key).await
    }

    /// Describe where the client should send the bytes for `qid`.
    ///
    /// Object stores hand out a pre-signed PUT URL. Backends that cannot sign
    /// fall back to the API's own upload route.
    pub async fn presign_upload(
        &self,
        qid: Qid,
        filename: &str,
        content_type: &str,
    ) -> StorageResult<UploadTarget> {
        let storage_path = self.quarantine_key(qid, filename);
        let expiry = ChronoDuration::minutes(self.presign_expiry_minutes);
        let expires_at = Utc::now() + expiry;
        let expires_in = Duration::from_secs(self.presign_expiry_minutes.max(0) as u64 * 60);

        match self
            .backend
            .presigned_put_url(&storage_path, content_type, expires_in)
            .await
        {
            Ok(url) => Ok(UploadTarget {
                method: "PUT".to_string(),
                url,
                storage_path,
                expires_at,
                presigned: true,
            }),
            Err(StorageError::ConfigError(_)) => Ok(UploadTarget {
                method: "PUT".to_string(),
                url: format!("{}/intake/upload/{}", self.public_base_url, qid),
                storage_path,
                expires_at,
                presigned: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// Round-trip a tiny object through the backend.
    pub async fn probe(&self) -> StorageResult<()> {
        self.backend
            .put(PROBE_KEY, Bytes::from_static(b"ok"), "text/plain")
            .await?;
        self.backend.get(PROBE_KEY).await?;
        self.backend.delete(PROBE_KEY).await
    }
}

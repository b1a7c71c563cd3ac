//! Intake orchestrator
//!
//! The synchronous entry point of the pipeline. Every call runs inside the
//! HTTP request; once a file is quarantined the rest happens on the stage
//! workers and is observed through [`IntakeOrchestrator::get_status`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use intake_core::models::{
    meta, HistoryResponse, InitiateUploadRequest, InitiateUploadResponse, NewIntakeRecord,
    PipelineStartResponse, RequestOrigin,
};
use intake_core::{
    AppError, IntakeRecord, IntakeStatus, PipelineEvent, PipelineStage, Qid, RecordUpdate,
};
use intake_db::{IntakeRecordStore, StoreError};
use intake_processing::{sha256_hex, verify_content_hash, FileValidator, ValidationError};
use intake_storage::{IntakeStorage, StorageError};
use intake_worker::{BusError, EventBus, SessionError, SessionManager};

use crate::error::storage_app_error;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Intake record {0} not found")]
    NotFound(Qid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The uploaded bytes failed validation; the record is now `rejected`.
    #[error("Upload {qid} rejected: {source}")]
    Rejected {
        qid: Qid,
        #[source]
        source: ValidationError,
    },

    #[error("No upload found for {0}; send the file to its upload target first")]
    UploadMissing(Qid),

    #[error("Upload for {qid} cannot be accepted while the record is {status}")]
    UploadClosed { qid: Qid, status: IntakeStatus },

    /// The upload target expired before the bytes arrived; the record is now `rejected`.
    #[error("Upload window for {qid} closed at {expired_at}")]
    UploadExpired { qid: Qid, expired_at: DateTime<Utc> },

    #[error("Record {qid} is {status}; only failed or finalize_failed records can be retried")]
    NotRetryable { qid: Qid, status: IntakeStatus },

    #[error("Record {0} does not say which stage failed")]
    UnknownFailedStage(Qid),

    #[error("Record {0} changed while the request was in flight")]
    Concurrent(Qid),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::NotFound(_) => AppError::NotFound(err.to_string()),
            IntakeError::Validation(e) => AppError::from(e),
            IntakeError::Rejected { .. } => AppError::Validation(err.to_string()),
            IntakeError::UploadMissing(_)
            | IntakeError::UploadClosed { .. }
            | IntakeError::UploadExpired { .. }
            | IntakeError::NotRetryable { .. } => AppError::BadRequest(err.to_string()),
            IntakeError::UnknownFailedStage(_) | IntakeError::Concurrent(_) => {
                AppError::Conflict(err.to_string())
            }
            IntakeError::Session(e) => AppError::from(e),
            IntakeError::Store(e) => AppError::from(e),
            IntakeError::Storage(e) => storage_app_error(e),
            IntakeError::Bus(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

pub type IntakeResult<T> = Result<T, IntakeError>;

/// Where the bytes of a completed upload come from.
#[derive(Debug, Clone)]
pub enum UploadPayload {
    /// Bytes sent with the completion call.
    Bytes {
        data: Bytes,
        content_hash: Option<String>,
    },
    /// Bytes already written to the upload target (pre-signed URL or the
    /// direct upload route).
    Staged { content_hash: Option<String> },
}

#[derive(Clone)]
pub struct IntakeOrchestrator {
    records: Arc<dyn IntakeRecordStore>,
    storage: IntakeStorage,
    validator: Arc<FileValidator>,
    bus: EventBus,
    sessions: SessionManager,
}

impl IntakeOrchestrator {
    pub fn new(
        records: Arc<dyn IntakeRecordStore>,
        storage: IntakeStorage,
        validator: Arc<FileValidator>,
        bus: EventBus,
        sessions: SessionManager,
    ) -> Self {
        Self {
            records,
            storage,
            validator,
            bus,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Validate the declared file and create its `initiated` record.
    ///
    /// Nothing is written when validation fails.
    #[tracing::instrument(
        skip(self, request),
        fields(
            filename = %request.filename,
            size_bytes = request.filesize,
            mime_type = %request.mime_type,
            source = %request.source
        )
    )]
    pub async fn initiate_upload(
        &self,
        request: InitiateUploadRequest,
    ) -> IntakeResult<InitiateUploadResponse> {
        self.validator
            .validate_declared(&request.filename, &request.mime_type, request.filesize)?;

        let qid = Qid::generate();
        let upload_target = self
            .storage
            .presign_upload(qid, &request.filename, &request.mime_type)
            .await?;

        let mut record = IntakeRecord::new(
            NewIntakeRecord {
                qid,
                sid: request.session_id,
                source: request.source,
                user_id: request.user_id,
                original_filename: request.filename.clone(),
                storage_path: self.storage.quarantine_key(qid, &request.filename),
                mime_type: request.mime_type.clone(),
                file_size: i64::try_from(request.filesize).unwrap_or(i64::MAX),
            },
            Utc::now(),
        );
        record.metadata.insert(
            meta::UPLOAD_EXPIRES_AT.to_string(),
            upload_target
                .expires_at
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );

        if let Some(sid) = request.session_id {
            self.sessions.attach(sid).await?;
        }
        if let Err(e) = self.records.insert(&record).await {
            if let Some(sid) = request.session_id {
                if let Err(detach_err) = self.sessions.detach(sid).await {
                    tracing::warn!(error = %detach_err, sid = %sid, "Failed to detach file from session");
                }
            }
            return Err(e.into());
        }

        tracing::info!(
            qid = %qid,
            status = %record.status,
            presigned = upload_target.presigned,
            "Upload initiated"
        );

        Ok(InitiateUploadResponse {
            qid,
            expires_at: upload_target.expires_at,
            upload_target,
            max_file_size: self.validator.max_file_size(),
            allowed_types: self.validator.allowed_content_types().to_vec(),
        })
    }

    /// Write raw bytes to the record's quarantine key ahead of completion.
    ///
    /// This is the upload target handed out when the backend cannot sign URLs.
    #[tracing::instrument(skip(self, data), fields(qid = %qid, size_bytes = data.len()))]
    pub async fn stage_upload(&self, qid: Qid, data: Bytes) -> IntakeResult<String> {
        let record = self.load(qid).await?;
        if record.status != IntakeStatus::Initiated {
            return Err(IntakeError::UploadClosed {
                qid,
                status: record.status,
            });
        }
        self.check_upload_window(&record).await?;
        self.validator.validate_file_size(data.len() as u64)?;

        let key = self
            .storage
            .put_quarantine(qid, &record.original_filename, &record.mime_type, data)
            .await?;
        tracing::debug!(qid = %qid, storage_key = %key, "Upload bytes staged");
        Ok(key)
    }

    /// Quarantine the uploaded bytes and hand the record to the scan stage.
    ///
    /// Calling this again for a record that already left `initiated` returns
    /// its current status and changes nothing.
    #[tracing::instrument(skip(self, payload), fields(qid = %qid))]
    pub async fn complete_upload(
        &self,
        qid: Qid,
        payload: UploadPayload,
    ) -> IntakeResult<PipelineStartResponse> {
        let record = self.load(qid).await?;
        if record.status != IntakeStatus::Initiated {
            tracing::debug!(qid = %qid, status = %record.status, "Upload already completed");
            return Ok(PipelineStartResponse::new(qid, record.status, None));
        }
        self.check_upload_window(&record).await?;

        let (data, client_hash, staged) = match payload {
            UploadPayload::Bytes { data, content_hash } => (data, content_hash, false),
            UploadPayload::Staged { content_hash } => {
                let data = match self.storage.get(&record.storage_path).await {
                    Ok(data) => data,
                    Err(StorageError::NotFound(_)) => return Err(IntakeError::UploadMissing(qid)),
                    Err(e) => return Err(e.into()),
                };
                (data, content_hash, true)
            }
        };

        let content_hash = sha256_hex(&data);
        if let Err(reason) = self.validate_upload(&record, &data, client_hash.as_deref()) {
            return Err(self.reject(&record, reason, staged).await);
        }

        let storage_path = if staged {
            record.storage_path.clone()
        } else {
            self.storage
                .put_quarantine(qid, &record.original_filename, &record.mime_type, data)
                .await?
        };

        let update = RecordUpdate::advance(IntakeStatus::Quarantined)
            .storage_path(storage_path)
            .content_hash(content_hash)
            .note("upload quarantined");
        let Some(quarantined) = self
            .records
            .transition(qid, IntakeStatus::Initiated, update)
            .await?
        else {
            // A concurrent completion won; report whatever it produced.
            let current = self.load(qid).await?;
            return Ok(PipelineStartResponse::new(qid, current.status, None));
        };

        tracing::info!(
            qid = %qid,
            status = %quarantined.status,
            size_bytes = quarantined.file_size,
            "Upload quarantined"
        );

        self.request_stage(PipelineStage::Scan, qid, RequestOrigin::Upload)
            .await;
        Ok(PipelineStartResponse::new(
            qid,
            quarantined.status,
            Some(PipelineStage::Scan),
        ))
    }

    fn validate_upload(
        &self,
        record: &IntakeRecord,
        data: &[u8],
        client_hash: Option<&str>,
    ) -> Result<(), ValidationError> {
        self.validator
            .validate_content(&record.original_filename, &record.mime_type, data)?;
        self.validator
            .validate_size_matches(record.file_size.max(0) as u64, data.len() as u64)?;
        if let Some(expected) = client_hash {
            verify_content_hash(expected, data)?;
        }
        Ok(())
    }

    async fn reject(&self, record: &IntakeRecord, reason: ValidationError, staged: bool) -> IntakeError {
        if let Err(e) = self.mark_rejected(record, &reason.to_string(), staged).await {
            return e;
        }
        IntakeError::Rejected {
            qid: record.qid,
            source: reason,
        }
    }

    /// Reject uploads arriving after the target's expiry, dropping any staged bytes.
    async fn check_upload_window(&self, record: &IntakeRecord) -> IntakeResult<()> {
        let Some(expired_at) = record.upload_expires_at() else {
            return Ok(());
        };
        if Utc::now() <= expired_at {
            return Ok(());
        }
        let message = format!("upload window closed at {}", expired_at);
        self.mark_rejected(record, &message, true).await?;
        Err(IntakeError::UploadExpired {
            qid: record.qid,
            expired_at,
        })
    }

    /// Move an `initiated` record to `rejected` and count it as a failed file.
    async fn mark_rejected(&self, record: &IntakeRecord, message: &str, staged: bool) -> IntakeResult<()> {
        tracing::warn!(qid = %record.qid, reason = %message, "Upload rejected");

        let update = RecordUpdate::fail(IntakeStatus::Rejected, message)
            .set_meta(meta::REJECTION_REASON, message)
            .note("upload validation failed");
        self.records
            .transition(record.qid, IntakeStatus::Initiated, update)
            .await?
            .ok_or(IntakeError::Concurrent(record.qid))?;

        if staged {
            if let Err(e) = self.storage.delete(&record.storage_path).await {
                tracing::warn!(
                    error = %e,
                    qid = %record.qid,
                    storage_key = %record.storage_path,
                    "Failed to remove rejected upload"
                );
            }
        }

        if let Some(sid) = record.sid {
            if let Err(e) = self.sessions.record_outcome(sid, false).await {
                tracing::warn!(error = %e, qid = %record.qid, sid = %sid, "Failed to update session");
            }
        }
        Ok(())
    }

    pub async fn get_status(&self, qid: Qid) -> IntakeResult<IntakeRecord> {
        self.load(qid).await
    }

    pub async fn history(&self, qid: Qid) -> IntakeResult<HistoryResponse> {
        // 404 for unknown records rather than an empty list.
        self.load(qid).await?;
        let transitions = self.records.history(qid).await?;
        Ok(HistoryResponse { qid, transitions })
    }

    /// Resume a failed record at the stage that failed.
    #[tracing::instrument(skip(self), fields(qid = %qid))]
    pub async fn retry_processing(&self, qid: Qid) -> IntakeResult<PipelineStartResponse> {
        let record = self.load(qid).await?;

        let stage = match record.status {
            IntakeStatus::Failed => record
                .failed_stage()
                .ok_or(IntakeError::UnknownFailedStage(qid))?,
            IntakeStatus::FinalizeFailed => PipelineStage::Finalize,
            status => return Err(IntakeError::NotRetryable { qid, status }),
        };

        let counted = record.meta_bool(meta::SESSION_COUNTED);
        let update = RecordUpdate::advance(stage.precondition())
            .stage(stage)
            .remove_meta(meta::FAILED_STAGE)
            .remove_meta(meta::SESSION_COUNTED)
            .note("retry requested");
        let resumed = self
            .records
            .transition(qid, record.status, update)
            .await?
            .ok_or(IntakeError::Concurrent(qid))?;

        tracing::info!(
            qid = %qid,
            from = %record.status,
            status = %resumed.status,
            stage = %stage,
            "Processing retry scheduled"
        );

        if let (true, Some(sid)) = (counted, record.sid) {
            if let Err(e) = self.sessions.reopen(sid).await {
                tracing::warn!(error = %e, qid = %qid, sid = %sid, "Failed to reopen session failure");
            }
        }

        self.request_stage(stage, qid, RequestOrigin::Retry).await;
        Ok(PipelineStartResponse::new(qid, resumed.status, Some(stage)))
    }

    /// Publish a stage request. A lost request leaves the record waiting on
    /// its precondition, where the stale sweep finds it.
    async fn request_stage(&self, stage: PipelineStage, qid: Qid, origin: RequestOrigin) {
        let event = PipelineEvent::stage_requested(stage, qid, origin);
        if let Err(e) = self.bus.publish(event).await {
            tracing::warn!(
                error = %e,
                qid = %qid,
                stage = %stage,
                "Stage request not published; stale sweep will requeue"
            );
        }
    }

    async fn load(&self, qid: Qid) -> IntakeResult<IntakeRecord> {
        self.records
            .get(qid)
            .await?
            .ok_or(IntakeError::NotFound(qid))
    }
}

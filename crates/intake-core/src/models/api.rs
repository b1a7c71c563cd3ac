use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

use crate::ids::{Qid, Sid};
use crate::models::{IntakeSource, IntakeStatus, PipelineStage, SessionType, StatusTransition};

/// Request to start an upload
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    /// Original filename as supplied by the client
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Declared file size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub filesize: u64,
    /// Declared content type
    #[validate(length(
        min = 1,
        max = 255,
        message = "Mime type must be between 1 and 255 characters"
    ))]
    pub mime_type: String,
    pub source: IntakeSource,
    #[serde(default, rename = "userID")]
    #[validate(length(max = 255, message = "User ID must be at most 255 characters"))]
    pub user_id: Option<String>,
    #[serde(default, rename = "sessionID")]
    pub session_id: Option<Sid>,
}

/// Time-bounded write capability for the upload bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    /// HTTP method to use against `url`
    pub method: String,
    pub url: String,
    /// Quarantine key the bytes will be stored under
    pub storage_path: String,
    pub expires_at: DateTime<Utc>,
    /// True when the URL is a pre-signed object-store URL rather than the
    /// API's own upload route.
    pub presigned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub qid: Qid,
    pub upload_target: UploadTarget,
    pub expires_at: DateTime<Utc>,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

/// Request to finish an upload.
///
/// Either carries the bytes inline (`contentBase64`) or refers to bytes
/// already written to the upload target, optionally with the client's own
/// SHA-256 for verification.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub qid: Qid,
    #[serde(default)]
    #[validate(length(equal = 64, message = "Content hash must be a hex SHA-256 digest"))]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub content_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStartResponse {
    pub qid: Qid,
    /// `processing` while the record is moving, otherwise its settled status
    pub status: String,
    pub record_status: IntakeStatus,
    /// Stage the pipeline (re-)entered at, when this call started work
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<PipelineStage>,
}

impl PipelineStartResponse {
    pub fn new(qid: Qid, record_status: IntakeStatus, resumed_at: Option<PipelineStage>) -> Self {
        let status = if record_status.is_settled() {
            record_status.to_string()
        } else {
            "processing".to_string()
        };
        PipelineStartResponse {
            qid,
            status,
            record_status,
            resumed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub qid: Qid,
    pub transitions: Vec<StatusTransition>,
}

/// Request to open an upload session
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, rename = "userID")]
    #[validate(length(max = 255, message = "User ID must be at most 255 characters"))]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_type: SessionType,
}

/// Per-stage worker pool counters
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageWorkerStatus {
    pub stage: PipelineStage,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    /// Events handled, whatever the outcome
    pub processed: u64,
    /// Events that advanced a record
    pub advanced: u64,
    /// Duplicate or stale events discarded by the precondition check
    pub discarded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusResponse {
    pub running: bool,
    pub stages: Vec<StageWorkerStatus>,
    pub records_by_status: BTreeMap<String, i64>,
}

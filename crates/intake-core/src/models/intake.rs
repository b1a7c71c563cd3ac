use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::ids::{Qid, Sid};

/// Well-known keys of `IntakeRecord::metadata`.
pub mod meta {
    pub const FAILED_STAGE: &str = "failedStage";
    pub const VIRUS_NAME: &str = "virusName";
    pub const SCAN_ENGINES: &str = "scanEngines";
    pub const SANITIZED_HASH: &str = "sanitizedHash";
    pub const SANITIZE_REPORT: &str = "sanitizeReport";
    pub const EXTRACTION_QUALITY: &str = "extractionQuality";
    pub const DOCUMENT_TYPE: &str = "documentType";
    pub const PARSE_CONFIDENCE: &str = "parseConfidence";
    pub const ARCHIVE_PATH: &str = "archivePath";
    pub const FINALIZE_ATTEMPTS: &str = "finalizeAttempts";
    pub const FINALIZE_ERROR: &str = "finalizeError";
    pub const REJECTION_REASON: &str = "rejectionReason";
    pub const UPLOAD_EXPIRES_AT: &str = "uploadExpiresAt";
    /// Set while the record's failure is counted in its session.
    pub const SESSION_COUNTED: &str = "sessionCounted";
}

/// Channel a file arrived through. Immutable once the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IntakeSource {
    Web,
    Whatsapp,
    Telegram,
    Email,
    Api,
}

impl Display for IntakeSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            IntakeSource::Web => "web",
            IntakeSource::Whatsapp => "whatsapp",
            IntakeSource::Telegram => "telegram",
            IntakeSource::Email => "email",
            IntakeSource::Api => "api",
        };
        f.write_str(s)
    }
}

impl FromStr for IntakeSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(IntakeSource::Web),
            "whatsapp" => Ok(IntakeSource::Whatsapp),
            "telegram" => Ok(IntakeSource::Telegram),
            "email" => Ok(IntakeSource::Email),
            "api" => Ok(IntakeSource::Api),
            _ => Err(anyhow::anyhow!("Invalid intake source: {}", s)),
        }
    }
}

/// Pipeline state of one intake record.
///
/// Ownership of a record is implied by its status: only the stage whose
/// precondition matches may move it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    Initiated,
    Quarantined,
    Scanning,
    Clean,
    Infected,
    Sanitized,
    Extracting,
    Extracted,
    Parsing,
    Completed,
    Archived,
    Failed,
    FinalizeFailed,
    Rejected,
    Deleted,
}

impl IntakeStatus {
    pub const ALL: [IntakeStatus; 15] = [
        IntakeStatus::Initiated,
        IntakeStatus::Quarantined,
        IntakeStatus::Scanning,
        IntakeStatus::Clean,
        IntakeStatus::Infected,
        IntakeStatus::Sanitized,
        IntakeStatus::Extracting,
        IntakeStatus::Extracted,
        IntakeStatus::Parsing,
        IntakeStatus::Completed,
        IntakeStatus::Archived,
        IntakeStatus::Failed,
        IntakeStatus::FinalizeFailed,
        IntakeStatus::Rejected,
        IntakeStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeStatus::Initiated => "initiated",
            IntakeStatus::Quarantined => "quarantined",
            IntakeStatus::Scanning => "scanning",
            IntakeStatus::Clean => "clean",
            IntakeStatus::Infected => "infected",
            IntakeStatus::Sanitized => "sanitized",
            IntakeStatus::Extracting => "extracting",
            IntakeStatus::Extracted => "extracted",
            IntakeStatus::Parsing => "parsing",
            IntakeStatus::Completed => "completed",
            IntakeStatus::Archived => "archived",
            IntakeStatus::Failed => "failed",
            IntakeStatus::FinalizeFailed => "finalize_failed",
            IntakeStatus::Rejected => "rejected",
            IntakeStatus::Deleted => "deleted",
        }
    }

    /// Statuses that must carry an `errorMessage`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            IntakeStatus::Failed
                | IntakeStatus::FinalizeFailed
                | IntakeStatus::Infected
                | IntakeStatus::Rejected
        )
    }

    /// No stage, retry or sweep will ever move the record again, except the
    /// retention sweep for `archived`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntakeStatus::Archived
                | IntakeStatus::Infected
                | IntakeStatus::Rejected
                | IntakeStatus::Deleted
        )
    }

    /// A stage worker has claimed the record and is calling an external engine.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            IntakeStatus::Scanning | IntakeStatus::Extracting | IntakeStatus::Parsing
        )
    }

    /// Whether the record has left the pipeline for good or is waiting on an
    /// explicit retry.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, IntakeStatus::Failed)
    }

    /// The edges of the pipeline state machine.
    pub fn can_transition_to(&self, next: IntakeStatus) -> bool {
        use IntakeStatus::*;
        matches!(
            (self, next),
            (Initiated, Quarantined)
                | (Initiated, Rejected)
                | (Quarantined, Scanning)
                | (Scanning, Clean)
                | (Scanning, Infected)
                | (Scanning, Failed)
                | (Scanning, Quarantined)
                | (Clean, Sanitized)
                | (Clean, Failed)
                | (Sanitized, Extracting)
                | (Extracting, Extracted)
                | (Extracting, Failed)
                | (Extracting, Sanitized)
                | (Extracted, Parsing)
                | (Parsing, Completed)
                | (Parsing, Failed)
                | (Parsing, Extracted)
                | (Completed, Archived)
                | (Completed, FinalizeFailed)
                | (FinalizeFailed, Completed)
                | (Failed, Quarantined)
                | (Failed, Clean)
                | (Failed, Sanitized)
                | (Failed, Extracted)
                | (Archived, Deleted)
        )
    }
}

impl Display for IntakeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntakeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntakeStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid intake status: {}", s))
    }
}

/// One step of the pipeline, each driven by its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Scan,
    Sanitize,
    Extract,
    Parse,
    Finalize,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Scan,
        PipelineStage::Sanitize,
        PipelineStage::Extract,
        PipelineStage::Parse,
        PipelineStage::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Scan => "scan",
            PipelineStage::Sanitize => "sanitize",
            PipelineStage::Extract => "extract",
            PipelineStage::Parse => "parse",
            PipelineStage::Finalize => "finalize",
        }
    }

    /// Status a record must be in for this stage to act on it.
    pub fn precondition(&self) -> IntakeStatus {
        match self {
            PipelineStage::Scan => IntakeStatus::Quarantined,
            PipelineStage::Sanitize => IntakeStatus::Clean,
            PipelineStage::Extract => IntakeStatus::Sanitized,
            PipelineStage::Parse => IntakeStatus::Extracted,
            PipelineStage::Finalize => IntakeStatus::Completed,
        }
    }

    /// In-progress status claimed before calling a slow external engine.
    pub fn claim_status(&self) -> Option<IntakeStatus> {
        match self {
            PipelineStage::Scan => Some(IntakeStatus::Scanning),
            PipelineStage::Extract => Some(IntakeStatus::Extracting),
            PipelineStage::Parse => Some(IntakeStatus::Parsing),
            PipelineStage::Sanitize | PipelineStage::Finalize => None,
        }
    }

    pub fn success_status(&self) -> IntakeStatus {
        match self {
            PipelineStage::Scan => IntakeStatus::Clean,
            PipelineStage::Sanitize => IntakeStatus::Sanitized,
            PipelineStage::Extract => IntakeStatus::Extracted,
            PipelineStage::Parse => IntakeStatus::Completed,
            PipelineStage::Finalize => IntakeStatus::Archived,
        }
    }

    /// Finalize failures never erase parse output, so they get their own status.
    pub fn failure_status(&self) -> IntakeStatus {
        match self {
            PipelineStage::Finalize => IntakeStatus::FinalizeFailed,
            _ => IntakeStatus::Failed,
        }
    }

    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Scan => Some(PipelineStage::Sanitize),
            PipelineStage::Sanitize => Some(PipelineStage::Extract),
            PipelineStage::Extract => Some(PipelineStage::Parse),
            PipelineStage::Parse => Some(PipelineStage::Finalize),
            PipelineStage::Finalize => None,
        }
    }

    /// Stage that consumes records waiting in `status`.
    pub fn waiting_on(status: IntakeStatus) -> Option<PipelineStage> {
        PipelineStage::ALL
            .into_iter()
            .find(|stage| stage.precondition() == status)
    }

    /// Stage that owns the in-progress `status`.
    pub fn claimed_by(status: IntakeStatus) -> Option<PipelineStage> {
        PipelineStage::ALL
            .into_iter()
            .find(|stage| stage.claim_status() == Some(status))
    }
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid pipeline stage: {}", s))
    }
}

/// One uploaded file and its progress through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRecord {
    pub qid: Qid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<Sid>,
    pub source: IntakeSource,
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub original_filename: String,
    pub sanitized_filename: Option<String>,
    pub storage_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub content_hash: Option<String>,
    pub status: IntakeStatus,
    pub error_message: Option<String>,
    pub extracted_text: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub parsed_output: Option<Value>,
    #[serde(rename = "profileID")]
    pub profile_id: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
    /// Bumped on every persisted update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields fixed at upload initiation.
#[derive(Debug, Clone)]
pub struct NewIntakeRecord {
    pub qid: Qid,
    pub sid: Option<Sid>,
    pub source: IntakeSource,
    pub user_id: Option<String>,
    pub original_filename: String,
    pub storage_path: String,
    pub mime_type: String,
    pub file_size: i64,
}

impl IntakeRecord {
    pub fn new(new: NewIntakeRecord, now: DateTime<Utc>) -> Self {
        IntakeRecord {
            qid: new.qid,
            sid: new.sid,
            source: new.source,
            user_id: new.user_id,
            original_filename: new.original_filename,
            sanitized_filename: None,
            storage_path: new.storage_path,
            mime_type: new.mime_type,
            file_size: new.file_size,
            content_hash: None,
            status: IntakeStatus::Initiated,
            error_message: None,
            extracted_text: None,
            parsed_output: None,
            profile_id: None,
            metadata: Map::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage recorded by the last failure, if any.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        self.metadata
            .get(meta::FAILED_STAGE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    /// End of the window in which the upload target accepts bytes.
    pub fn upload_expires_at(&self) -> Option<DateTime<Utc>> {
        self.meta_str(meta::UPLOAD_EXPIRES_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Hash the current blob at `storage_path` must match: the sanitized
    /// hash once sanitize has run, otherwise the upload hash.
    pub fn expected_blob_hash(&self) -> Option<&str> {
        self.meta_str(meta::SANITIZED_HASH)
            .or(self.content_hash.as_deref())
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for IntakeRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let decode = |col: &str, e: anyhow::Error| {
            sqlx::Error::Decode(format!("Failed to parse {}: {}", col, e).into())
        };
        let metadata = match row.get::<Value, _>("metadata") {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(IntakeRecord {
            qid: row.get("qid"),
            sid: row.get("sid"),
            source: row
                .get::<String, _>("source")
                .parse()
                .map_err(|e| decode("source", e))?,
            user_id: row.get("user_id"),
            original_filename: row.get("original_filename"),
            sanitized_filename: row.get("sanitized_filename"),
            storage_path: row.get("storage_path"),
            mime_type: row.get("mime_type"),
            file_size: row.get("file_size"),
            content_hash: row.get("content_hash"),
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(|e| decode("status", e))?,
            error_message: row.get("error_message"),
            extracted_text: row.get("extracted_text"),
            parsed_output: row.get("parsed_output"),
            profile_id: row.get("profile_id"),
            metadata,
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// A single conditional mutation of an intake record.
///
/// Built with [`RecordUpdate::advance`] for forward progress or
/// [`RecordUpdate::fail`] for failure statuses; stores reject updates that
/// break the state machine or the error-message invariant.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub status: IntakeStatus,
    /// Stage responsible for the transition, written to history.
    pub stage: Option<PipelineStage>,
    pub note: Option<String>,
    /// Replaces the stored message; `None` clears it.
    pub error_message: Option<String>,
    pub storage_path: Option<String>,
    pub sanitized_filename: Option<String>,
    pub content_hash: Option<String>,
    pub extracted_text: Option<String>,
    pub parsed_output: Option<Value>,
    pub profile_id: Option<String>,
    pub metadata_set: Map<String, Value>,
    pub metadata_remove: Vec<String>,
}

impl RecordUpdate {
    fn to_status(status: IntakeStatus, error_message: Option<String>) -> Self {
        RecordUpdate {
            status,
            stage: None,
            note: None,
            error_message,
            storage_path: None,
            sanitized_filename: None,
            content_hash: None,
            extracted_text: None,
            parsed_output: None,
            profile_id: None,
            metadata_set: Map::new(),
            metadata_remove: Vec::new(),
        }
    }

    /// Move to a non-failure status, clearing any stored error.
    pub fn advance(status: IntakeStatus) -> Self {
        Self::to_status(status, None)
    }

    /// Move to a failure status with a human-readable reason.
    pub fn fail(status: IntakeStatus, message: impl Into<String>) -> Self {
        Self::to_status(status, Some(message.into()))
    }

    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn sanitized_filename(mut self, name: impl Into<String>) -> Self {
        self.sanitized_filename = Some(name.into());
        self
    }

    pub fn content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn extracted_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    pub fn parsed_output(mut self, output: Value) -> Self {
        self.parsed_output = Some(output);
        self
    }

    pub fn profile_id(mut self, id: impl Into<String>) -> Self {
        self.profile_id = Some(id.into());
        self
    }

    pub fn set_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata_set.insert(key.to_string(), value.into());
        self
    }

    pub fn remove_meta(mut self, key: &str) -> Self {
        self.metadata_remove.push(key.to_string());
        self
    }

    /// Check the update against the record's current status.
    pub fn check(&self, from: IntakeStatus) -> Result<(), String> {
        if !from.can_transition_to(self.status) {
            return Err(format!(
                "illegal transition {} -> {}",
                from, self.status
            ));
        }
        match (self.status.is_failure(), self.error_message.is_some()) {
            (true, false) => Err(format!("status {} requires an error message", self.status)),
            (false, true) => Err(format!(
                "status {} must not carry an error message",
                self.status
            )),
            _ => Ok(()),
        }
    }

    /// Apply the update in place and return the history entry it produces.
    pub fn apply(&self, record: &mut IntakeRecord, now: DateTime<Utc>) -> StatusTransition {
        let from = record.status;
        record.status = self.status;
        record.error_message = self.error_message.clone();
        if let Some(path) = &self.storage_path {
            record.storage_path = path.clone();
        }
        if let Some(name) = &self.sanitized_filename {
            record.sanitized_filename = Some(name.clone());
        }
        if let Some(hash) = &self.content_hash {
            record.content_hash = Some(hash.clone());
        }
        if let Some(text) = &self.extracted_text {
            record.extracted_text = Some(text.clone());
        }
        if let Some(output) = &self.parsed_output {
            record.parsed_output = Some(output.clone());
        }
        if let Some(id) = &self.profile_id {
            record.profile_id = Some(id.clone());
        }
        for key in &self.metadata_remove {
            record.metadata.remove(key);
        }
        for (key, value) in &self.metadata_set {
            record.metadata.insert(key.clone(), value.clone());
        }
        record.version += 1;
        record.updated_at = now;

        StatusTransition {
            qid: record.qid,
            from: Some(from),
            to: self.status,
            stage: self.stage,
            note: self.note.clone(),
            at: now,
        }
    }
}

/// Entry of a record's ordered transition history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub qid: Qid,
    /// `None` for the creation entry.
    pub from: Option<IntakeStatus>,
    pub to: IntakeStatus,
    pub stage: Option<PipelineStage>,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn created(record: &IntakeRecord) -> Self {
        StatusTransition {
            qid: record.qid,
            from: None,
            to: record.status,
            stage: None,
            note: Some(format!("upload initiated via {}", record.source)),
            at: record.created_at,
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for StatusTransition {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let decode = |col: &str, e: anyhow::Error| {
            sqlx::Error::Decode(format!("Failed to parse {}: {}", col, e).into())
        };
        let from = row
            .get::<Option<String>, _>("from_status")
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| decode("from_status", e))?;
        let stage = row
            .get::<Option<String>, _>("stage")
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| decode("stage", e))?;

        Ok(StatusTransition {
            qid: row.get("qid"),
            from,
            to: row
                .get::<String, _>("to_status")
                .parse()
                .map_err(|e| decode("to_status", e))?,
            stage,
            note: row.get("note"),
            at: row.get("created_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> IntakeRecord {
        IntakeRecord::new(
            NewIntakeRecord {
                qid: Qid::generate(),
                sid: None,
                source: IntakeSource::Web,
                user_id: Some("user-1".to_string()),
                original_filename: "resume.pdf".to_string(),
                storage_path: "quarantine/x/resume.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                file_size: 51_200,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_status_round_trips_through_wire_name() {
        for status in IntakeStatus::ALL {
            assert_eq!(status.as_str().parse::<IntakeStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&IntakeStatus::FinalizeFailed).unwrap(),
            "\"finalize_failed\""
        );
    }

    #[test]
    fn test_happy_path_is_a_chain_of_legal_edges() {
        use IntakeStatus::*;
        let path = [
            Initiated,
            Quarantined,
            Scanning,
            Clean,
            Sanitized,
            Extracting,
            Extracted,
            Parsing,
            Completed,
            Archived,
            Deleted,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_illegal_edges_are_rejected() {
        use IntakeStatus::*;
        assert!(!Sanitized.can_transition_to(Parsing));
        assert!(!Quarantined.can_transition_to(Extracting));
        assert!(!Infected.can_transition_to(Clean));
        assert!(!Infected.can_transition_to(Quarantined));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Deleted.can_transition_to(Archived));
        assert!(!Rejected.can_transition_to(Quarantined));
    }

    #[test]
    fn test_terminal_statuses_have_no_exits_except_retention() {
        for from in IntakeStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            let exits: Vec<_> = IntakeStatus::ALL
                .into_iter()
                .filter(|to| from.can_transition_to(*to))
                .collect();
            if from == IntakeStatus::Archived {
                assert_eq!(exits, vec![IntakeStatus::Deleted]);
            } else {
                assert!(exits.is_empty(), "{} has exits {:?}", from, exits);
            }
        }
    }

    #[test]
    fn test_stage_table_is_consistent() {
        for stage in PipelineStage::ALL {
            let pre = stage.precondition();
            match stage.claim_status() {
                Some(claim) => {
                    assert!(pre.can_transition_to(claim));
                    assert!(claim.can_transition_to(stage.success_status()));
                    assert!(claim.can_transition_to(stage.failure_status()));
                    assert!(claim.can_transition_to(pre));
                    assert_eq!(PipelineStage::claimed_by(claim), Some(stage));
                }
                None => {
                    assert!(pre.can_transition_to(stage.success_status()));
                    assert!(pre.can_transition_to(stage.failure_status()));
                }
            }
            assert_eq!(PipelineStage::waiting_on(pre), Some(stage));
            if let Some(next) = stage.next() {
                assert_eq!(stage.success_status(), next.precondition());
            }
        }
    }

    #[test]
    fn test_retry_targets_are_reachable_from_failed() {
        for stage in PipelineStage::ALL
            .into_iter()
            .filter(|s| *s != PipelineStage::Finalize)
        {
            assert!(IntakeStatus::Failed.can_transition_to(stage.precondition()));
        }
        assert!(IntakeStatus::FinalizeFailed.can_transition_to(IntakeStatus::Completed));
    }

    #[test]
    fn test_update_check_enforces_error_message_invariant() {
        let ok = RecordUpdate::fail(IntakeStatus::Failed, "engine down");
        assert!(ok.check(IntakeStatus::Scanning).is_ok());

        let missing = RecordUpdate::advance(IntakeStatus::Failed);
        assert!(missing.check(IntakeStatus::Scanning).is_err());

        let stray = RecordUpdate::fail(IntakeStatus::Clean, "oops");
        assert!(stray.check(IntakeStatus::Scanning).is_err());

        let illegal = RecordUpdate::advance(IntakeStatus::Extracting);
        assert!(illegal
            .check(IntakeStatus::Quarantined)
            .unwrap_err()
            .contains("illegal transition"));
    }

    #[test]
    fn test_apply_merges_metadata_and_clears_error() {
        let mut rec = record();
        rec.status = IntakeStatus::Failed;
        rec.error_message = Some("boom".to_string());
        rec.metadata
            .insert(meta::FAILED_STAGE.to_string(), Value::from("extract"));
        rec.metadata
            .insert(meta::SANITIZED_HASH.to_string(), Value::from("abc"));
        assert_eq!(rec.failed_stage(), Some(PipelineStage::Extract));

        let update = RecordUpdate::advance(IntakeStatus::Sanitized)
            .note("retry")
            .remove_meta(meta::FAILED_STAGE);
        let transition = update.apply(&mut rec, Utc::now());

        assert_eq!(rec.status, IntakeStatus::Sanitized);
        assert!(rec.error_message.is_none());
        assert!(rec.failed_stage().is_none());
        assert_eq!(rec.meta_str(meta::SANITIZED_HASH), Some("abc"));
        assert_eq!(rec.version, 2);
        assert_eq!(transition.from, Some(IntakeStatus::Failed));
        assert_eq!(transition.to, IntakeStatus::Sanitized);
    }

    #[test]
    fn test_expected_blob_hash_prefers_sanitized_hash() {
        let mut rec = record();
        rec.content_hash = Some("upload".to_string());
        assert_eq!(rec.expected_blob_hash(), Some("upload"));
        rec.metadata
            .insert(meta::SANITIZED_HASH.to_string(), Value::from("clean"));
        assert_eq!(rec.expected_blob_hash(), Some("clean"));
    }

    #[test]
    fn test_record_serializes_with_wire_field_names() {
        let rec = record();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["originalFilename"], "resume.pdf");
        assert_eq!(json["userID"], "user-1");
        assert!(json.get("profileID").is_some());
        assert_eq!(json["status"], "initiated");
    }
}

//! Store traits shared by every backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::models::FileSession;
use intake_core::{IntakeRecord, IntakeStatus, Qid, RecordUpdate, Sid, StatusTransition};

use crate::error::StoreResult;

/// Persistent state of every intake attempt.
#[async_trait]
pub trait IntakeRecordStore: Send + Sync {
    /// Insert a freshly initiated record together with its creation history entry.
    async fn insert(&self, record: &IntakeRecord) -> StoreResult<()>;

    async fn get(&self, qid: Qid) -> StoreResult<Option<IntakeRecord>>;

    /// Atomically apply `update` if the record is currently in `expected`.
    ///
    /// Returns the updated record, or `None` when the record is missing or has
    /// already left `expected` (nothing is written in that case). Updates that
    /// would break the state machine fail with `StoreError::InvalidUpdate`.
    async fn transition(
        &self,
        qid: Qid,
        expected: IntakeStatus,
        update: RecordUpdate,
    ) -> StoreResult<Option<IntakeRecord>>;

    /// Ordered transition history, oldest first.
    async fn history(&self, qid: Qid) -> StoreResult<Vec<StatusTransition>>;

    /// Records in one of `statuses` not updated since `older_than`, oldest first.
    async fn list_stale(
        &self,
        statuses: &[IntakeStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<IntakeRecord>>;

    async fn list_by_session(&self, sid: Sid) -> StoreResult<Vec<IntakeRecord>>;

    /// Record count per status name.
    async fn count_by_status(&self) -> StoreResult<BTreeMap<String, i64>>;

    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Persistent upload sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &FileSession) -> StoreResult<()>;

    async fn get(&self, sid: Sid) -> StoreResult<Option<FileSession>>;

    /// Count one more file into an active, unexpired session.
    ///
    /// Returns `None` when the session does not exist or no longer accepts files.
    async fn add_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>>;

    /// Count one terminal outcome and recompute progress and status.
    async fn record_outcome(
        &self,
        sid: Sid,
        success: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FileSession>>;

    /// Uncount a file added by `add_file` whose record was never created.
    async fn detach_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>>;

    /// Take back one counted failure after its record re-entered the pipeline.
    async fn reopen_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>>;

    /// Mark active sessions past their expiry as expired; returns how many changed.
    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

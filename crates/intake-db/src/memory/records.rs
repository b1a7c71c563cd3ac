use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::{IntakeRecord, IntakeStatus, Qid, RecordUpdate, Sid, StatusTransition};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::IntakeRecordStore;

#[derive(Default)]
struct Inner {
    records: HashMap<Qid, IntakeRecord>,
    history: HashMap<Qid, Vec<StatusTransition>>,
}

#[derive(Clone, Default)]
pub struct MemoryIntakeRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryIntakeRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntakeRecordStore for MemoryIntakeRecordStore {
    async fn insert(&self, record: &IntakeRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.qid) {
            return Err(StoreError::Duplicate(format!("intake record {}", record.qid)));
        }
        inner.records.insert(record.qid, record.clone());
        inner
            .history
            .insert(record.qid, vec![StatusTransition::created(record)]);
        Ok(())
    }

    async fn get(&self, qid: Qid) -> StoreResult<Option<IntakeRecord>> {
        Ok(self.inner.lock().await.records.get(&qid).cloned())
    }

    async fn transition(
        &self,
        qid: Qid,
        expected: IntakeStatus,
        update: RecordUpdate,
    ) -> StoreResult<Option<IntakeRecord>> {
        update.check(expected).map_err(StoreError::InvalidUpdate)?;

        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&qid) else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }

        let entry = update.apply(record, Utc::now());
        let updated = record.clone();
        inner.history.entry(qid).or_default().push(entry);

        Ok(Some(updated))
    }

    async fn history(&self, qid: Qid) -> StoreResult<Vec<StatusTransition>> {
        Ok(self
            .inner
            .lock()
            .await
            .history
            .get(&qid)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_stale(
        &self,
        statuses: &[IntakeStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<IntakeRecord>> {
        let inner = self.inner.lock().await;
        let mut stale: Vec<IntakeRecord> = inner
            .records
            .values()
            .filter(|r| statuses.contains(&r.status) && r.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn list_by_session(&self, sid: Sid) -> StoreResult<Vec<IntakeRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<IntakeRecord> = inner
            .records
            .values()
            .filter(|r| r.sid == Some(sid))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.qid);
        Ok(records)
    }

    async fn count_by_status(&self) -> StoreResult<BTreeMap<String, i64>> {
        let inner = self.inner.lock().await;
        let mut counts = BTreeMap::new();
        for record in inner.records.values() {
            *counts.entry(record.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use intake_core::models::NewIntakeRecord;
    use intake_core::{IntakeSource, PipelineStage};

    fn record(sid: Option<Sid>) -> IntakeRecord {
        let qid = Qid::generate();
        IntakeRecord::new(
            NewIntakeRecord {
                qid,
                sid,
                source: IntakeSource::Web,
                user_id: None,
                original_filename: "resume.pdf".to_string(),
                storage_path: format!("quarantine/{}/resume.pdf", qid),
                mime_type: "application/pdf".to_string(),
                file_size: 1024,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_qid() {
        let store = MemoryIntakeRecordStore::new();
        let r = record(None);
        store.insert(&r).await.unwrap();
        assert!(matches!(
            store.insert(&r).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_is_conditional_on_expected_status() {
        let store = MemoryIntakeRecordStore::new();
        let r = record(None);
        store.insert(&r).await.unwrap();

        let first = store
            .transition(r.qid, IntakeStatus::Initiated, RecordUpdate::advance(IntakeStatus::Quarantined))
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.status), Some(IntakeStatus::Quarantined));

        // A duplicate delivery observes the old precondition and is discarded.
        let second = store
            .transition(r.qid, IntakeStatus::Initiated, RecordUpdate::advance(IntakeStatus::Quarantined))
            .await
            .unwrap();
        assert!(second.is_none());

        let history = store.history(r.qid).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, Some(IntakeStatus::Initiated));
        assert_eq!(history[1].to, IntakeStatus::Quarantined);
    }

    #[tokio::test]
    async fn test_transition_rejects_illegal_edges() {
        let store = MemoryIntakeRecordStore::new();
        let r = record(None);
        store.insert(&r).await.unwrap();

        let result = store
            .transition(r.qid, IntakeStatus::Initiated, RecordUpdate::advance(IntakeStatus::Extracting))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidUpdate(_))));
        assert_eq!(
            store.get(r.qid).await.unwrap().unwrap().status,
            IntakeStatus::Initiated
        );
    }

    #[tokio::test]
    async fn test_failure_metadata_round_trip() {
        let store = MemoryIntakeRecordStore::new();
        let r = record(None);
        store.insert(&r).await.unwrap();
        store
            .transition(r.qid, IntakeStatus::Initiated, RecordUpdate::advance(IntakeStatus::Quarantined))
            .await
            .unwrap();
        store
            .transition(r.qid, IntakeStatus::Quarantined, RecordUpdate::advance(IntakeStatus::Scanning))
            .await
            .unwrap();

        let failed = store
            .transition(
                r.qid,
                IntakeStatus::Scanning,
                RecordUpdate::fail(IntakeStatus::Failed, "engine unreachable")
                    .stage(PipelineStage::Scan)
                    .set_meta(intake_core::models::meta::FAILED_STAGE, "scan"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.failed_stage(), Some(PipelineStage::Scan));
        assert_eq!(failed.error_message.as_deref(), Some("engine unreachable"));

        let retried = store
            .transition(
                r.qid,
                IntakeStatus::Failed,
                RecordUpdate::advance(IntakeStatus::Quarantined)
                    .remove_meta(intake_core::models::meta::FAILED_STAGE),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(retried.error_message.is_none());
        assert!(retried.failed_stage().is_none());
        assert_eq!(retried.version, 5);
    }

    #[tokio::test]
    async fn test_list_stale_and_counts() {
        let store = MemoryIntakeRecordStore::new();
        let sid = Sid::generate();
        let a = record(Some(sid));
        let b = record(Some(sid));
        let c = record(None);
        for r in [&a, &b, &c] {
            store.insert(r).await.unwrap();
        }
        store
            .transition(a.qid, IntakeStatus::Initiated, RecordUpdate::advance(IntakeStatus::Quarantined))
            .await
            .unwrap();

        let future = Utc::now() + Duration::seconds(5);
        let stale = store
            .list_stale(&[IntakeStatus::Quarantined], future, 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].qid, a.qid);

        let past = Utc::now() - Duration::seconds(60);
        assert!(store
            .list_stale(&[IntakeStatus::Quarantined], past, 10)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(store.list_by_session(sid).await.unwrap().len(), 2);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.get("initiated"), Some(&2));
        assert_eq!(counts.get("quarantined"), Some(&1));
    }
}

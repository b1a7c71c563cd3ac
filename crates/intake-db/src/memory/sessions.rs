use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::models::{FileSession, SessionStatus};
use intake_core::Sid;
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::SessionStore;

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<Sid, FileSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &FileSession) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Duplicate(format!(
                "session {}",
                session.session_id
            )));
        }
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, sid: Sid) -> StoreResult<Option<FileSession>> {
        Ok(self.sessions.lock().await.get(&sid).cloned())
    }

    async fn add_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&sid) {
            Some(session) if session.accepts_files(now) => {
                session.add_file(now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_outcome(
        &self,
        sid: Sid,
        success: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FileSession>> {
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.get_mut(&sid).map(|session| {
            session.record_outcome(success, now);
            session.clone()
        }))
    }

    async fn detach_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.get_mut(&sid).map(|session| {
            session.detach_file(now);
            session.clone()
        }))
    }

    async fn reopen_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.get_mut(&sid).map(|session| {
            session.reopen_file(now);
            session.clone()
        }))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut expired = 0;
        for session in sessions.values_mut() {
            if session.status == SessionStatus::Active && session.is_expired(now) {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use intake_core::models::SessionType;

    #[tokio::test]
    async fn test_add_file_only_while_active() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = FileSession::new(None, SessionType::Batch, Duration::minutes(10), now);
        store.create(&session).await.unwrap();

        let updated = store.add_file(session.session_id, now).await.unwrap().unwrap();
        assert_eq!(updated.file_count, 1);

        let later = now + Duration::minutes(11);
        assert!(store.add_file(session.session_id, later).await.unwrap().is_none());
        assert!(store.add_file(Sid::generate(), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_stale_marks_only_active_sessions() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let short = FileSession::new(None, SessionType::Single, Duration::minutes(1), now);
        let long = FileSession::new(None, SessionType::Single, Duration::minutes(60), now);
        store.create(&short).await.unwrap();
        store.create(&long).await.unwrap();

        let expired = store.expire_stale(now + Duration::minutes(2)).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(
            store.get(short.session_id).await.unwrap().unwrap().status,
            SessionStatus::Expired
        );
        assert_eq!(
            store.get(long.session_id).await.unwrap().unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_record_outcome_completes_session() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = FileSession::new(None, SessionType::Batch, Duration::minutes(10), now);
        store.create(&session).await.unwrap();
        store.add_file(session.session_id, now).await.unwrap();
        store.add_file(session.session_id, now).await.unwrap();

        let s = store
            .record_outcome(session.session_id, true, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.progress, 50);
        assert_eq!(s.status, SessionStatus::Active);

        let s = store
            .record_outcome(session.session_id, false, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.progress, 100);
        assert_eq!(s.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_detach_and_reopen_adjust_counters() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = FileSession::new(None, SessionType::Batch, Duration::minutes(10), now);
        let sid = session.session_id;
        store.create(&session).await.unwrap();
        store.add_file(sid, now).await.unwrap();
        store.add_file(sid, now).await.unwrap();

        let s = store.detach_file(sid, now).await.unwrap().unwrap();
        assert_eq!(s.file_count, 1);

        let s = store.record_outcome(sid, false, now).await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Failed);

        let s = store.reopen_file(sid, now).await.unwrap().unwrap();
        assert_eq!(s.failed_files, 0);
        assert_eq!(s.progress, 0);
        assert_eq!(s.status, SessionStatus::Active);

        assert!(store.reopen_file(Sid::generate(), now).await.unwrap().is_none());
    }
}

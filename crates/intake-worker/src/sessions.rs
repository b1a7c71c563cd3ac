//! Upload session management.

use std::sync::Arc;

use chrono::{Duration, Utc};
use intake_core::models::{FileSession, SessionStatus, SessionType};
use intake_core::{AppError, Sid};
use intake_db::{SessionStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(Sid),

    #[error("Session {sid} no longer accepts files (status: {status}, expired: {expired})")]
    NotAcceptingFiles {
        sid: Sid,
        status: SessionStatus,
        expired: bool,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => AppError::NotFound(err.to_string()),
            SessionError::NotAcceptingFiles { .. } => AppError::Validation(err.to_string()),
            SessionError::Store(e) => AppError::from(e),
        }
    }
}

/// Groups intake records under an expiring upload session.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl_minutes: i64) -> Self {
        Self {
            store,
            ttl: Duration::minutes(ttl_minutes.max(1)),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[tracing::instrument(skip(self), fields(session.type = %session_type))]
    pub async fn open(
        &self,
        user_id: Option<String>,
        session_type: SessionType,
    ) -> Result<FileSession, SessionError> {
        let session = FileSession::new(user_id, session_type, self.ttl, Utc::now());
        self.store.create(&session).await?;
        tracing::info!(
            sid = %session.session_id,
            expires_at = %session.expires_at,
            "Upload session opened"
        );
        Ok(session)
    }

    /// Count one more file into `sid`.
    pub async fn attach(&self, sid: Sid) -> Result<FileSession, SessionError> {
        let now = Utc::now();
        if let Some(session) = self.store.add_file(sid, now).await? {
            tracing::debug!(sid = %sid, file_count = session.file_count, "File attached to session");
            return Ok(session);
        }

        match self.store.get(sid).await? {
            None => Err(SessionError::NotFound(sid)),
            Some(session) => Err(SessionError::NotAcceptingFiles {
                sid,
                status: session.status,
                expired: session.is_expired(now),
            }),
        }
    }

    pub async fn record_outcome(&self, sid: Sid, success: bool) -> Result<FileSession, SessionError> {
        let session = self
            .store
            .record_outcome(sid, success, Utc::now())
            .await?
            .ok_or(SessionError::NotFound(sid))?;
        tracing::debug!(
            sid = %sid,
            success,
            progress = session.progress,
            status = %session.status,
            "Session outcome recorded"
        );
        Ok(session)
    }

    /// Release a file counted by `attach` whose record was never created.
    pub async fn detach(&self, sid: Sid) -> Result<FileSession, SessionError> {
        let session = self
            .store
            .detach_file(sid, Utc::now())
            .await?
            .ok_or(SessionError::NotFound(sid))?;
        tracing::debug!(sid = %sid, file_count = session.file_count, "File detached from session");
        Ok(session)
    }

    /// Take a counted failure back out after its record was retried.
    pub async fn reopen(&self, sid: Sid) -> Result<FileSession, SessionError> {
        let session = self
            .store
            .reopen_file(sid, Utc::now())
            .await?
            .ok_or(SessionError::NotFound(sid))?;
        tracing::debug!(
            sid = %sid,
            failed_files = session.failed_files,
            status = %session.status,
            "Session failure reopened"
        );
        Ok(session)
    }

    pub async fn snapshot(&self, sid: Sid) -> Result<FileSession, SessionError> {
        self.store.get(sid).await?.ok_or(SessionError::NotFound(sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_db::MemorySessionStore;

    fn manager() -> (SessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        (SessionManager::new(store.clone(), 60), store)
    }

    #[tokio::test]
    async fn test_open_attach_and_complete() {
        let (sessions, _) = manager();
        let session = sessions
            .open(Some("user-1".to_string()), SessionType::Batch)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        sessions.attach(session.session_id).await.unwrap();
        sessions.attach(session.session_id).await.unwrap();
        sessions.record_outcome(session.session_id, true).await.unwrap();

        let half = sessions.snapshot(session.session_id).await.unwrap();
        assert_eq!(half.file_count, 2);
        assert_eq!(half.progress, 50);

        let done = sessions.record_outcome(session.session_id, true).await.unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_attach_to_expired_session_is_rejected() {
        let (sessions, store) = manager();
        let expired = FileSession::new(
            None,
            SessionType::Single,
            Duration::minutes(5),
            Utc::now() - Duration::minutes(10),
        );
        store.create(&expired).await.unwrap();

        let err = sessions.attach(expired.session_id).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotAcceptingFiles { expired: true, .. }
        ));
        assert!(matches!(AppError::from(err), AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (sessions, _) = manager();
        let sid = Sid::generate();
        assert!(matches!(
            sessions.attach(sid).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            sessions.snapshot(sid).await,
            Err(SessionError::NotFound(_))
        ));
    }
}

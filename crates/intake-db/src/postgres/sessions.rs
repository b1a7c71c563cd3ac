use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::models::{FileSession, SessionStatus};
use intake_core::Sid;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::store::SessionStore;

const SESSION_COLUMNS: &str = r#"
    sid, user_id, session_type, status, file_count, processed_files,
    failed_files, progress, expires_at, created_at, updated_at
"#;

/// Upload sessions in PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        sid: Sid,
    ) -> StoreResult<Option<FileSession>> {
        let session = sqlx::query_as::<_, FileSession>(&format!(
            "SELECT {} FROM file_sessions WHERE sid = $1 FOR UPDATE",
            SESSION_COLUMNS
        ))
        .bind(sid)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(session)
    }

    async fn save(tx: &mut Transaction<'_, Postgres>, session: &FileSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE file_sessions SET
                status = $2,
                file_count = $3,
                processed_files = $4,
                failed_files = $5,
                progress = $6,
                updated_at = $7
            WHERE sid = $1
            "#,
        )
        .bind(session.session_id)
        .bind(session.status.to_string())
        .bind(session.file_count)
        .bind(session.processed_files)
        .bind(session.failed_files)
        .bind(session.progress)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &FileSession) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_sessions (
                sid, user_id, session_type, status, file_count, processed_files,
                failed_files, progress, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (sid) DO NOTHING
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id.as_deref())
        .bind(session.session_type.to_string())
        .bind(session.status.to_string())
        .bind(session.file_count)
        .bind(session.processed_files)
        .bind(session.failed_files)
        .bind(session.progress)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!("session {}", session.session_id)));
        }
        Ok(())
    }

    async fn get(&self, sid: Sid) -> StoreResult<Option<FileSession>> {
        let session = sqlx::query_as::<_, FileSession>(&format!(
            "SELECT {} FROM file_sessions WHERE sid = $1",
            SESSION_COLUMNS
        ))
        .bind(sid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn add_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = Self::lock(&mut tx, sid).await? else {
            return Ok(None);
        };
        if !session.accepts_files(now) {
            return Ok(None);
        }
        session.add_file(now);
        Self::save(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn record_outcome(
        &self,
        sid: Sid,
        success: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FileSession>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = Self::lock(&mut tx, sid).await? else {
            return Ok(None);
        };
        session.record_outcome(success, now);
        Self::save(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn detach_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = Self::lock(&mut tx, sid).await? else {
            return Ok(None);
        };
        session.detach_file(now);
        Self::save(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn reopen_file(&self, sid: Sid, now: DateTime<Utc>) -> StoreResult<Option<FileSession>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = Self::lock(&mut tx, sid).await? else {
            return Ok(None);
        };
        session.reopen_file(now);
        Self::save(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE file_sessions
            SET status = $1, updated_at = $2
            WHERE status = $3 AND expires_at <= $2
            "#,
        )
        .bind(SessionStatus::Expired.to_string())
        .bind(now)
        .bind(SessionStatus::Active.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

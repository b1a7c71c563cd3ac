use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::{IntakeRecord, IntakeStatus, Qid, RecordUpdate, Sid, StatusTransition};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::store::IntakeRecordStore;

const RECORD_COLUMNS: &str = r#"
    qid, sid, source, user_id, original_filename, sanitized_filename,
    storage_path, mime_type, file_size, content_hash, status, error_message,
    extracted_text, parsed_output, profile_id, metadata, version,
    created_at, updated_at
"#;

/// Intake records in PostgreSQL.
#[derive(Clone)]
pub struct PgIntakeRecordStore {
    pool: PgPool,
}

impl PgIntakeRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_history(
        tx: &mut Transaction<'_, Postgres>,
        entry: &StatusTransition,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO intake_status_history (qid, from_status, to_status, stage, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.qid)
        .bind(entry.from.map(|s| s.as_str()))
        .bind(entry.to.as_str())
        .bind(entry.stage.map(|s| s.as_str()))
        .bind(entry.note.as_deref())
        .bind(entry.at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IntakeRecordStore for PgIntakeRecordStore {
    #[tracing::instrument(skip(self, record), fields(qid = %record.qid))]
    async fn insert(&self, record: &IntakeRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO intake_records (
                qid, sid, source, user_id, original_filename, storage_path,
                mime_type, file_size, content_hash, status, metadata, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (qid) DO NOTHING
            "#,
        )
        .bind(record.qid)
        .bind(record.sid)
        .bind(record.source.to_string())
        .bind(record.user_id.as_deref())
        .bind(&record.original_filename)
        .bind(&record.storage_path)
        .bind(&record.mime_type)
        .bind(record.file_size)
        .bind(record.content_hash.as_deref())
        .bind(record.status.as_str())
        .bind(Value::Object(record.metadata.clone()))
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!("intake record {}", record.qid)));
        }

        Self::insert_history(&mut tx, &StatusTransition::created(record)).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get(&self, qid: Qid) -> StoreResult<Option<IntakeRecord>> {
        let record = sqlx::query_as::<_, IntakeRecord>(&format!(
            "SELECT {} FROM intake_records WHERE qid = $1",
            RECORD_COLUMNS
        ))
        .bind(qid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, update), fields(to = %update.status))]
    async fn transition(
        &self,
        qid: Qid,
        expected: IntakeStatus,
        update: RecordUpdate,
    ) -> StoreResult<Option<IntakeRecord>> {
        update.check(expected).map_err(StoreError::InvalidUpdate)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, IntakeRecord>(&format!(
            r#"
            UPDATE intake_records SET
                status = $3,
                error_message = $4,
                storage_path = COALESCE($5, storage_path),
                sanitized_filename = COALESCE($6, sanitized_filename),
                content_hash = COALESCE($7, content_hash),
                extracted_text = COALESCE($8, extracted_text),
                parsed_output = COALESCE($9, parsed_output),
                profile_id = COALESCE($10, profile_id),
                metadata = (metadata - $11::text[]) || $12::jsonb,
                version = version + 1,
                updated_at = $13
            WHERE qid = $1 AND status = $2
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(qid)
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(update.error_message.as_deref())
        .bind(update.storage_path.as_deref())
        .bind(update.sanitized_filename.as_deref())
        .bind(update.content_hash.as_deref())
        .bind(update.extracted_text.as_deref())
        .bind(update.parsed_output.clone())
        .bind(update.profile_id.as_deref())
        .bind(update.metadata_remove.clone())
        .bind(Value::Object(update.metadata_set.clone()))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        let entry = StatusTransition {
            qid,
            from: Some(expected),
            to: update.status,
            stage: update.stage,
            note: update.note.clone(),
            at: now,
        };
        Self::insert_history(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Some(record))
    }

    async fn history(&self, qid: Qid) -> StoreResult<Vec<StatusTransition>> {
        let entries = sqlx::query_as::<_, StatusTransition>(
            r#"
            SELECT qid, from_status, to_status, stage, note, created_at
            FROM intake_status_history
            WHERE qid = $1
            ORDER BY id
            "#,
        )
        .bind(qid)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn list_stale(
        &self,
        statuses: &[IntakeStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<IntakeRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let records = sqlx::query_as::<_, IntakeRecord>(&format!(
            r#"
            SELECT {}
            FROM intake_records
            WHERE status = ANY($1) AND updated_at < $2
            ORDER BY updated_at
            LIMIT $3
            "#,
            RECORD_COLUMNS
        ))
        .bind(statuses)
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_by_session(&self, sid: Sid) -> StoreResult<Vec<IntakeRecord>> {
        let records = sqlx::query_as::<_, IntakeRecord>(&format!(
            "SELECT {} FROM intake_records WHERE sid = $1 ORDER BY qid",
            RECORD_COLUMNS
        ))
        .bind(sid)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_by_status(&self) -> StoreResult<BTreeMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM intake_records GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(row.try_get::<String, _>("status")?, row.try_get::<i64, _>("count")?);
        }
        Ok(counts)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::connect_and_migrate;
    use intake_core::models::NewIntakeRecord;
    use intake_core::IntakeSource;

    async fn store() -> PgIntakeRecordStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = connect_and_migrate(&url, 5, 10).await.unwrap();
        PgIntakeRecordStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database (DATABASE_URL)"]
    async fn test_conditional_transition_against_postgres() {
        let store = store().await;
        let qid = Qid::generate();
        let record = IntakeRecord::new(
            NewIntakeRecord {
                qid,
                sid: None,
                source: IntakeSource::Api,
                user_id: None,
                original_filename: "cv.txt".to_string(),
                storage_path: format!("quarantine/{}/cv.txt", qid),
                mime_type: "text/plain".to_string(),
                file_size: 12,
            },
            Utc::now(),
        );
        store.insert(&record).await.unwrap();

        let update = RecordUpdate::advance(IntakeStatus::Quarantined)
            .content_hash("abc")
            .set_meta("k", "v");
        let updated = store
            .transition(qid, IntakeStatus::Initiated, update.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, IntakeStatus::Quarantined);
        assert_eq!(updated.meta_str("k"), Some("v"));
        assert_eq!(updated.version, 2);

        assert!(store
            .transition(qid, IntakeStatus::Initiated, update)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.history(qid).await.unwrap().len(), 2);
    }
}

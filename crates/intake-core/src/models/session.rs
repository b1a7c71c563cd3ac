use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::ids::Sid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "expired" => Ok(SessionStatus::Expired),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Single,
    Batch,
    Chat,
}

impl Display for SessionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            SessionType::Single => "single",
            SessionType::Batch => "batch",
            SessionType::Chat => "chat",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SessionType::Single),
            "batch" => Ok(SessionType::Batch),
            "chat" => Ok(SessionType::Chat),
            _ => Err(anyhow::anyhow!("Invalid session type: {}", s)),
        }
    }
}

/// Optional aggregate over the intake records of one upload session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSession {
    #[serde(rename = "sessionID")]
    pub session_id: Sid,
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub file_count: i32,
    pub processed_files: i32,
    pub failed_files: i32,
    /// 0-100
    pub progress: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileSession {
    pub fn new(
        user_id: Option<String>,
        session_type: SessionType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        FileSession {
            session_id: Sid::generate(),
            user_id,
            session_type,
            status: SessionStatus::Active,
            file_count: 0,
            processed_files: 0,
            failed_files: 0,
            progress: 0,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// New files may join only while the session is active and unexpired.
    pub fn accepts_files(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && !self.is_expired(now)
    }

    pub fn add_file(&mut self, now: DateTime<Utc>) {
        self.file_count += 1;
        self.recompute(now);
    }

    /// Count one record reaching a terminal outcome.
    pub fn record_outcome(&mut self, success: bool, now: DateTime<Utc>) {
        if success {
            self.processed_files += 1;
        } else {
            self.failed_files += 1;
        }
        self.recompute(now);
    }

    /// Undo `add_file` for a file whose record was never created.
    pub fn detach_file(&mut self, now: DateTime<Utc>) {
        self.file_count = (self.file_count - 1).max(0);
        self.recompute(now);
    }

    /// Take back a counted failure whose record re-entered the pipeline.
    pub fn reopen_file(&mut self, now: DateTime<Utc>) {
        self.failed_files = (self.failed_files - 1).max(0);
        self.recompute(now);
    }

    /// Progress and status follow the counters. Expired and cancelled
    /// sessions keep their status.
    fn recompute(&mut self, now: DateTime<Utc>) {
        let done = self.processed_files + self.failed_files;
        self.progress = if self.file_count > 0 {
            ((done.min(self.file_count) * 100) / self.file_count).clamp(0, 100)
        } else {
            0
        };
        if matches!(
            self.status,
            SessionStatus::Active | SessionStatus::Completed | SessionStatus::Failed
        ) {
            self.status = if self.file_count == 0 || done < self.file_count {
                SessionStatus::Active
            } else if self.failed_files > 0 {
                SessionStatus::Failed
            } else {
                SessionStatus::Completed
            };
        }
        self.updated_at = now;
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for FileSession {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(FileSession {
            session_id: row.get("sid"),
            user_id: row.get("user_id"),
            session_type: row.get::<String, _>("session_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse session_type: {}", e).into())
            })?,
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse session status: {}", e).into())
            })?,
            file_count: row.get("file_count"),
            processed_files: row.get("processed_files"),
            failed_files: row.get("failed_files"),
            progress: row.get("progress"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

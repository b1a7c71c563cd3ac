use intake_core::AppError;
use thiserror::Error;

/// Record and session store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    /// The update would break the record state machine.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Duplicate(what) => AppError::Conflict(what),
            StoreError::InvalidUpdate(msg) => AppError::Conflict(msg),
            StoreError::Migration(msg) => AppError::Internal(msg),
        }
    }
}

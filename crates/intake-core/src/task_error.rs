//! Stage execution error types
//!
//! Wraps a `PipelineError` with a recoverability flag so a stage attempt can
//! tell the bounded retry loop to stop early (integrity mismatch, infected
//! verdict) or to spend another attempt (engine unreachable, timeout).

use std::fmt;

use crate::error::PipelineError;

/// Stage execution error that can be either recoverable or unrecoverable
#[derive(Debug, Clone)]
pub struct TaskError {
    inner: PipelineError,
    recoverable: bool,
}

impl TaskError {
    /// Unrecoverable errors fail the stage immediately without retrying.
    pub fn unrecoverable(err: PipelineError) -> Self {
        Self {
            inner: err,
            recoverable: false,
        }
    }

    /// Recoverable errors are retried up to the configured attempt count.
    pub fn recoverable(err: PipelineError) -> Self {
        Self {
            inner: err,
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &PipelineError {
        &self.inner
    }

    pub fn into_inner(self) -> PipelineError {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl From<PipelineError> for TaskError {
    /// Classifies by the error's own notion of transience.
    fn from(err: PipelineError) -> Self {
        let recoverable = err.is_transient();
        Self {
            inner: err,
            recoverable,
        }
    }
}

/// Extension trait for Result to mark stage failures as unrecoverable
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<PipelineError>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}

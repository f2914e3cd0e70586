//! Worker error types.

use thiserror::Error;

use shorts_media::MediaError;

use crate::retry::Retryable;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Source resolution failed: {0}")]
    Resolution(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is worth another encode attempt for the same clip.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Errors that abort the whole job, not just one clip.
    pub fn is_job_fatal(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_job_fatal(),
            WorkerError::Resolution(_) | WorkerError::Planning(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled | WorkerError::Media(MediaError::Cancelled)
        )
    }
}

impl Retryable for WorkerError {
    fn is_retryable(&self) -> bool {
        WorkerError::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_errors_are_retryable() {
        let err = WorkerError::from(MediaError::encode_failed(Some(1), "broken pipe"));
        assert!(err.is_retryable());
        assert!(!err.is_job_fatal());

        let err = WorkerError::from(MediaError::verification("duration mismatch"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_geometry_errors_are_fatal() {
        let err = WorkerError::from(MediaError::invalid_geometry("zero width"));
        assert!(!err.is_retryable());
        assert!(err.is_job_fatal());
    }

    #[test]
    fn test_cancellation() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::from(MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::Cancelled.is_retryable());
        assert!(!WorkerError::resolution("404").is_cancelled());
    }
}

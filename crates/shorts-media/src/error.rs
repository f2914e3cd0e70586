//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("Invalid duration: duration={duration}, max clip duration={max_clip_duration}")]
    InvalidDuration { duration: f64, max_clip_duration: f64 },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Encoding failed with exit code {}: {stderr_tail}", fmt_exit_code(.exit_code))]
    EncodeFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Encoding timed out after {timeout_secs} seconds: {stderr_tail}")]
    EncodeTimedOut {
        timeout_secs: u64,
        stderr_tail: String,
    },

    #[error("Encoded output failed verification: {0}")]
    EncodeVerification(String),

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Download quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Unreadable media file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl MediaError {
    /// Create an encode failure error.
    pub fn encode_failed(exit_code: Option<i32>, stderr_tail: impl Into<String>) -> Self {
        Self::EncodeFailed {
            exit_code,
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Create an encode verification error.
    pub fn verification(message: impl Into<String>) -> Self {
        Self::EncodeVerification(message.into())
    }

    /// Create an invalid geometry error.
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry(message.into())
    }

    /// Create an unreadable file error.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a per-clip retry may succeed.
    ///
    /// Only encoder failures and verification failures are retried; geometry,
    /// duration and cancellation errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EncodeFailed { .. } | Self::EncodeTimedOut { .. } | Self::EncodeVerification(_)
        )
    }

    /// Errors that invalidate the whole job rather than one clip.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry(_) | Self::InvalidDuration { .. } | Self::FfmpegNotFound
        )
    }
}

//! Clip plan and produced clip models.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::format_span;
use crate::JobId;

/// A planned time range of the source, rendered into exactly one clip.
///
/// Spans are half-open: `[start, end)`, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipSpec {
    /// Owning job
    pub job_id: JobId,
    /// 0-based sequence index; defines delivery order
    pub index: usize,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds (exclusive)
    pub end: f64,
}

impl ClipSpec {
    /// Length of the span in seconds.
    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    /// Output file name for this clip, e.g. `talk_part03.mp4` (1-based, like
    /// the delivered names users see).
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}_part{:02}.mp4", stem, self.index + 1)
    }

    /// Human-readable span, e.g. `00:00:50-00:01:40`.
    pub fn span_label(&self) -> String {
        format_span(self.start, self.end)
    }
}

/// Per-clip processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Waiting for an encoder slot
    #[default]
    Pending,
    /// An encode attempt is running (or retrying)
    Encoding,
    /// Encoded and verified
    Ready,
    /// Failed permanently
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Encoding => "encoding",
            ClipStatus::Ready => "ready",
            ClipStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClipStatus::Ready | ClipStatus::Failed)
    }

    /// Pending clips may fail without being attempted (job cancelled).
    pub fn can_transition_to(&self, next: ClipStatus) -> bool {
        matches!(
            (self, next),
            (ClipStatus::Pending, ClipStatus::Encoding)
                | (ClipStatus::Pending, ClipStatus::Failed)
                | (ClipStatus::Encoding, ClipStatus::Ready)
                | (ClipStatus::Encoding, ClipStatus::Failed)
        )
    }
}

impl std::fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An encoded output segment corresponding to a [`ClipSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub spec: ClipSpec,
    /// Output file path
    pub path: PathBuf,
    /// Duration measured from the encoded file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub status: ClipStatus,
    /// Encode attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// Last error, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Clip {
    /// Create a pending clip for a spec.
    pub fn pending(spec: ClipSpec, path: impl AsRef<Path>) -> Self {
        Self {
            spec,
            path: path.as_ref().to_path_buf(),
            duration: None,
            status: ClipStatus::Pending,
            attempts: 0,
            error: None,
        }
    }

    /// Create a verified clip, as returned by the transcoder.
    pub fn ready(spec: ClipSpec, path: impl AsRef<Path>, duration: f64) -> Self {
        Self {
            spec,
            path: path.as_ref().to_path_buf(),
            duration: Some(duration),
            status: ClipStatus::Ready,
            attempts: 1,
            error: None,
        }
    }

    /// Move to `Encoding`. Returns false if the transition is not allowed.
    pub fn start_encoding(&mut self) -> bool {
        self.transition(ClipStatus::Encoding)
    }

    /// Record a verified output.
    pub fn complete(&mut self, duration: f64, attempts: u32) -> bool {
        if !self.transition(ClipStatus::Ready) {
            return false;
        }
        self.duration = Some(duration);
        self.attempts = attempts;
        self.error = None;
        true
    }

    /// Record a permanent failure.
    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) -> bool {
        if !self.transition(ClipStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        self.attempts = attempts;
        true
    }

    pub fn is_ready(&self) -> bool {
        self.status == ClipStatus::Ready
    }

    fn transition(&mut self, next: ClipStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

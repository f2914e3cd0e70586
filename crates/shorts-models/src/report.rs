//! Final job report handed to the delivery layer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::{format_seconds, format_span};
use crate::{Clip, ClipStatus, JobId, JobState, SourceVideo};

/// Source metadata as shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceSummary {
    pub file_name: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

impl From<&SourceVideo> for SourceSummary {
    fn from(source: &SourceVideo) -> Self {
        Self {
            file_name: source
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            duration: source.duration,
            width: source.width,
            height: source.height,
        }
    }
}

/// A clip that was encoded and verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReadyClip {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub path: PathBuf,
    /// Measured output duration in seconds
    pub duration: f64,
    pub attempts: u32,
}

/// A clip that failed permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailedClip {
    pub index: usize,
    /// Span as `HH:MM:SS-HH:MM:SS`
    pub span: String,
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one job.
///
/// Ready and failed clips are kept in ascending index order regardless of
/// the order in which encodes finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSummary>,
    pub ready: Vec<ReadyClip>,
    pub failed: Vec<FailedClip>,
    /// Job-level error (resolution, planning, cancellation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Report for a job that stopped before any clip was attempted.
    pub fn job_failed(
        job_id: JobId,
        source: Option<&SourceVideo>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            source: source.map(SourceSummary::from),
            ready: Vec::new(),
            failed: Vec::new(),
            error: Some(error.into()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Build a report from terminal clips.
    ///
    /// The state is derived from the outcomes unless a job-level error is
    /// given, in which case the job is `Failed`.
    pub fn from_clips(
        job_id: JobId,
        source: &SourceVideo,
        clips: &[Clip],
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut ordered: Vec<&Clip> = clips.iter().collect();
        ordered.sort_by_key(|c| c.spec.index);

        let mut ready = Vec::new();
        let mut failed = Vec::new();
        for clip in ordered {
            match clip.status {
                ClipStatus::Ready => ready.push(ReadyClip {
                    index: clip.spec.index,
                    start: clip.spec.start,
                    end: clip.spec.end,
                    path: clip.path.clone(),
                    duration: clip.duration.unwrap_or_else(|| clip.spec.span()),
                    attempts: clip.attempts,
                }),
                _ => failed.push(FailedClip {
                    index: clip.spec.index,
                    span: format_span(clip.spec.start, clip.spec.end),
                    attempts: clip.attempts,
                    error: clip
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("clip ended in state {}", clip.status)),
                }),
            }
        }

        let state = if error.is_some() {
            JobState::Failed
        } else {
            JobState::from_clip_outcomes(ready.len(), failed.len())
        };

        Self {
            job_id,
            state,
            source: Some(SourceSummary::from(source)),
            ready,
            failed,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Whether there is anything to hand to the delivery layer.
    pub fn is_deliverable(&self) -> bool {
        matches!(
            self.state,
            JobState::Completed | JobState::PartiallyCompleted
        ) && !self.ready.is_empty()
    }

    /// Paths of ready clips in delivery order.
    pub fn ready_paths(&self) -> Vec<PathBuf> {
        self.ready.iter().map(|c| c.path.clone()).collect()
    }

    /// Sum of measured durations of ready clips.
    pub fn total_duration(&self) -> f64 {
        self.ready.iter().map(|c| c.duration).sum()
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Short human-readable summary for the requester.
    pub fn summary_message(&self) -> String {
        let mut lines = Vec::new();
        match self.state {
            JobState::Completed => lines.push(format!(
                "Processed {} clip(s) successfully.",
                self.ready.len()
            )),
            JobState::PartiallyCompleted => lines.push(format!(
                "Processed {} of {} clip(s).",
                self.ready.len(),
                self.ready.len() + self.failed.len()
            )),
            _ => lines.push("Processing failed.".to_string()),
        }

        if !self.ready.is_empty() {
            lines.push(format!("Clips generated: {}", self.ready.len()));
            lines.push(format!("Total duration: {:.1}s", self.total_duration()));
        }
        for failed in &self.failed {
            lines.push(format!(
                "Failed part {:02} ({}): {}",
                failed.index + 1,
                failed.span,
                failed.error
            ));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {}", error));
        }
        if let Some(source) = &self.source {
            lines.push(format!(
                "Source: {} ({}x{}, {})",
                source.file_name,
                source.width,
                source.height,
                format_seconds(source.duration)
            ));
        }
        lines.push(format!("Session ID: {}", self.job_id));

        lines.join("\n")
    }
}

//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use metrics::{counter, histogram};

use shorts_models::JobState;

/// Metric names as constants for consistency.
pub mod names {
    pub const CLIPS_RENDERED_TOTAL: &str = "shorts_clips_rendered_total";
    pub const CLIP_RENDER_SECONDS: &str = "shorts_clip_render_seconds";
    pub const CLIP_ATTEMPTS: &str = "shorts_clip_attempts";
    pub const JOBS_TOTAL: &str = "shorts_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "shorts_job_duration_seconds";
}

/// Record one clip reaching a terminal status.
pub fn record_clip(outcome: &'static str, attempts: u32, duration_secs: f64) {
    let labels = [("outcome", outcome)];
    counter!(names::CLIPS_RENDERED_TOTAL, &labels).increment(1);
    histogram!(names::CLIP_RENDER_SECONDS, &labels).record(duration_secs);
    histogram!(names::CLIP_ATTEMPTS).record(attempts as f64);
}

/// Record a job reaching a terminal state.
pub fn record_job(state: JobState, duration_secs: f64) {
    let labels = [("state", state.as_str())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

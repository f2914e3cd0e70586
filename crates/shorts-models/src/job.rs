//! Job identifiers and lifecycle states.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    ///
    /// Uses the first 8 hex characters of a v4 UUID, which keeps scratch
    /// directory names and delivered file names short.
    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Resolving -> Planning -> Converting -> {Completed, PartiallyCompleted, Failed}`.
/// `Resolving` and `Planning` may also move directly to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Acquiring and probing the source video
    #[default]
    Resolving,
    /// Computing clip boundaries and the geometry transform
    Planning,
    /// Encoding clips
    Converting,
    /// Every clip was produced
    Completed,
    /// At least one clip was produced and at least one failed permanently
    PartiallyCompleted,
    /// No clip was produced, or a job-level error occurred
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Resolving => "resolving",
            JobState::Planning => "planning",
            JobState::Converting => "converting",
            JobState::Completed => "completed",
            JobState::PartiallyCompleted => "partially_completed",
            JobState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::PartiallyCompleted | JobState::Failed
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Resolving, Planning)
                | (Resolving, Failed)
                | (Planning, Converting)
                | (Planning, Failed)
                | (Converting, Completed)
                | (Converting, PartiallyCompleted)
                | (Converting, Failed)
        )
    }

    /// Terminal state for a finished conversion stage, given per-clip outcomes.
    pub fn from_clip_outcomes(ready: usize, failed: usize) -> JobState {
        match (ready, failed) {
            (0, _) => JobState::Failed,
            (_, 0) => JobState::Completed,
            _ => JobState::PartiallyCompleted,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_short_hex() {
        let id = JobId::new();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, JobId::new());
    }

    #[test]
    fn test_job_state_transitions() {
        assert!(JobState::Resolving.can_transition_to(JobState::Planning));
        assert!(JobState::Resolving.can_transition_to(JobState::Failed));
        assert!(JobState::Converting.can_transition_to(JobState::PartiallyCompleted));
        assert!(!JobState::Resolving.can_transition_to(JobState::Converting));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Planning.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_terminal_state_from_outcomes() {
        assert_eq!(JobState::from_clip_outcomes(4, 0), JobState::Completed);
        assert_eq!(JobState::from_clip_outcomes(3, 1), JobState::PartiallyCompleted);
        assert_eq!(JobState::from_clip_outcomes(0, 4), JobState::Failed);
        assert!(JobState::PartiallyCompleted.is_terminal());
        assert!(!JobState::Converting.is_terminal());
    }

    #[test]
    fn test_job_state_serde() {
        let json = serde_json::to_string(&JobState::PartiallyCompleted).unwrap();
        assert_eq!(json, "\"partially_completed\"");
    }
}

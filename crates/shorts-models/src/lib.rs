//! Shared data models for the portrait shorts pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job states and job reports
//! - Clip plans (`ClipSpec`) and produced clips (`Clip`)
//! - Source video descriptors
//! - Output format, fit policy and encoding configuration

pub mod clip;
pub mod encoding;
pub mod format;
pub mod job;
pub mod report;
pub mod source;
pub mod timestamp;

// Re-export common types
pub use clip::{Clip, ClipSpec, ClipStatus};
pub use encoding::EncodingConfig;
pub use format::{FitPolicy, FormatParseError, OutputFormat, PadBackground};
pub use job::{JobId, JobState};
pub use report::{FailedClip, JobReport, ReadyClip, SourceSummary};
pub use source::SourceVideo;
pub use timestamp::TimestampError;

//! Media layer for the portrait shorts pipeline.
//!
//! This crate provides:
//! - Clip boundary planning (`planner`)
//! - Source-to-portrait geometry and filter graphs (`aspect`)
//! - Per-clip encoding with verification (`transcode`)
//! - A scoped FFmpeg subprocess runner with progress, timeout and cancellation
//! - FFprobe metadata probing and yt-dlp downloads

pub mod aspect;
pub mod command;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use aspect::{plan_geometry, AspectConverter, CropRect, Fit, GeometryTransform};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{is_supported_url, SourceFetcher, YtDlpFetcher};
pub use error::{MediaError, MediaResult};
pub use planner::{plan_clips, ClipPlanner};
pub use probe::{probe_video, FfprobeProbe, MediaProbe, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use transcode::{ClipRenderer, RenderRequest, TimeoutPolicy, Transcoder};

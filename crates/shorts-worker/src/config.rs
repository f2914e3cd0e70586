//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shorts_media::TimeoutPolicy;
use shorts_models::timestamp::parse_timestamp;
use shorts_models::{EncodingConfig, FitPolicy, OutputFormat, PadBackground};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::RetryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound for a single clip, in seconds
    pub max_clip_duration: f64,
    /// Output frame size
    pub output_format: OutputFormat,
    /// How sources are fitted into the output frame
    pub fit_policy: FitPolicy,
    /// Fill for padded areas
    pub pad_background: PadBackground,
    /// Encoder profile
    pub encoding: EncodingConfig,
    /// Per-clip encode timeout (base + per second of clip)
    pub encode_timeout: TimeoutPolicy,
    /// Maximum concurrent encodes across all jobs
    pub max_concurrent_encodes: usize,
    /// Maximum concurrent encodes within one job
    pub max_encodes_per_job: usize,
    /// Retries per clip after the first attempt
    pub max_clip_retries: u32,
    /// Backoff before the first retry (doubles each retry)
    pub retry_base_delay: Duration,
    /// Backoff cap
    pub retry_max_delay: Duration,
    /// Root for per-job scratch directories
    pub work_dir: PathBuf,
    /// Accepted difference between requested and encoded clip duration, in seconds
    pub duration_tolerance: f64,
    /// Largest accepted source file
    pub max_source_bytes: u64,
    /// Longest accepted source, in seconds
    pub max_source_duration: f64,
    /// Download timeout for remote sources
    pub download_timeout: Duration,
    /// Scratch directories older than this are removed at startup
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_clip_duration: 50.0,
            output_format: OutputFormat::default(),
            fit_policy: FitPolicy::default(),
            pad_background: PadBackground::default(),
            encoding: EncodingConfig::default(),
            encode_timeout: TimeoutPolicy::default(),
            max_concurrent_encodes: default_parallelism(),
            max_encodes_per_job: 2,
            max_clip_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(5),
            work_dir: PathBuf::from("./work"),
            duration_tolerance: 0.5,
            max_source_bytes: 500 * 1024 * 1024, // 500 MB
            max_source_duration: 3600.0,         // 1 hour
            download_timeout: Duration::from_secs(1800),
            stale_after: Duration::from_secs(24 * 3600),
        }
    }
}

impl WorkerConfig {
    /// Create config from `SHORTS_*` environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let encoding = EncodingConfig {
            crf: env_parse("SHORTS_ENCODE_CRF").unwrap_or(defaults.encoding.crf),
            preset: std::env::var("SHORTS_ENCODE_PRESET").unwrap_or(defaults.encoding.preset),
            ..defaults.encoding
        };

        Self {
            max_clip_duration: std::env::var("SHORTS_MAX_CLIP_DURATION")
                .ok()
                .and_then(|s| parse_timestamp(&s).ok())
                .unwrap_or(defaults.max_clip_duration),
            output_format: env_parse("SHORTS_OUTPUT_RESOLUTION").unwrap_or(defaults.output_format),
            fit_policy: env_parse("SHORTS_FIT_POLICY").unwrap_or(defaults.fit_policy),
            pad_background: env_parse("SHORTS_PAD_BACKGROUND").unwrap_or(defaults.pad_background),
            encoding,
            encode_timeout: TimeoutPolicy {
                base: Duration::from_secs(
                    env_parse("SHORTS_ENCODE_TIMEOUT_BASE").unwrap_or(60),
                ),
                per_second: Duration::from_secs(
                    env_parse("SHORTS_ENCODE_TIMEOUT_PER_SEC").unwrap_or(6),
                ),
            },
            max_concurrent_encodes: env_parse("SHORTS_MAX_CONCURRENT_ENCODES")
                .unwrap_or(defaults.max_concurrent_encodes),
            max_encodes_per_job: env_parse("SHORTS_MAX_ENCODES_PER_JOB")
                .unwrap_or(defaults.max_encodes_per_job),
            max_clip_retries: env_parse("SHORTS_MAX_CLIP_RETRIES")
                .unwrap_or(defaults.max_clip_retries),
            retry_base_delay: Duration::from_millis(
                env_parse("SHORTS_RETRY_BASE_MS").unwrap_or(500),
            ),
            retry_max_delay: defaults.retry_max_delay,
            work_dir: std::env::var("SHORTS_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            duration_tolerance: env_parse("SHORTS_DURATION_TOLERANCE")
                .unwrap_or(defaults.duration_tolerance),
            max_source_bytes: env_parse::<u64>("SHORTS_MAX_SOURCE_MB")
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(defaults.max_source_bytes),
            max_source_duration: std::env::var("SHORTS_MAX_SOURCE_DURATION")
                .ok()
                .and_then(|s| parse_timestamp(&s).ok())
                .unwrap_or(defaults.max_source_duration),
            download_timeout: Duration::from_secs(
                env_parse("SHORTS_DOWNLOAD_TIMEOUT").unwrap_or(1800),
            ),
            stale_after: Duration::from_secs(
                env_parse::<u64>("SHORTS_STALE_AFTER_HOURS")
                    .unwrap_or(24)
                    .saturating_mul(3600),
            ),
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> WorkerResult<()> {
        if !self.max_clip_duration.is_finite() || self.max_clip_duration <= 0.0 {
            return Err(WorkerError::config_error(format!(
                "max clip duration must be positive, got {}",
                self.max_clip_duration
            )));
        }
        if self.output_format.width == 0
            || self.output_format.height == 0
            || self.output_format.width % 2 != 0
            || self.output_format.height % 2 != 0
        {
            return Err(WorkerError::config_error(format!(
                "output resolution must be even and non-zero, got {}",
                self.output_format
            )));
        }
        if self.max_concurrent_encodes == 0 || self.max_encodes_per_job == 0 {
            return Err(WorkerError::config_error(
                "encode concurrency limits must be at least 1",
            ));
        }
        if !self.duration_tolerance.is_finite() || self.duration_tolerance < 0.0 {
            return Err(WorkerError::config_error(format!(
                "duration tolerance must be non-negative, got {}",
                self.duration_tolerance
            )));
        }
        if self.encoding.crf > 51 {
            return Err(WorkerError::config_error(format!(
                "CRF must be in 0..=51, got {}",
                self.encoding.crf
            )));
        }
        if self.max_source_bytes == 0 || self.max_source_duration <= 0.0 {
            return Err(WorkerError::config_error("source limits must be positive"));
        }
        if self.encode_timeout.base.is_zero() && self.encode_timeout.per_second.is_zero() {
            return Err(WorkerError::config_error("encode timeout must be positive"));
        }
        Ok(())
    }

    /// Retry policy for clip encodes.
    pub fn clip_retry(&self) -> RetryConfig {
        RetryConfig::new("clip_encode")
            .with_max_retries(self.max_clip_retries)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_clip_duration, 50.0);
        assert_eq!(config.output_format, OutputFormat::new(1080, 1920));
        assert_eq!(config.fit_policy, FitPolicy::CropFill);
        assert_eq!(config.max_encodes_per_job, 2);
        assert_eq!(config.max_clip_retries, 2);
        assert!(config.max_concurrent_encodes >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = WorkerConfig {
            max_clip_duration: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));

        let config = WorkerConfig {
            max_encodes_per_job: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            output_format: OutputFormat::new(1081, 1920),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            duration_tolerance: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("SHORTS_MAX_CLIP_DURATION", "00:00:30");
        std::env::set_var("SHORTS_FIT_POLICY", "pad-letterbox");
        std::env::set_var("SHORTS_PAD_BACKGROUND", "blur");
        std::env::set_var("SHORTS_MAX_ENCODES_PER_JOB", "not-a-number");

        let config = WorkerConfig::from_env();

        std::env::remove_var("SHORTS_MAX_CLIP_DURATION");
        std::env::remove_var("SHORTS_FIT_POLICY");
        std::env::remove_var("SHORTS_PAD_BACKGROUND");
        std::env::remove_var("SHORTS_MAX_ENCODES_PER_JOB");

        assert_eq!(config.max_clip_duration, 30.0);
        assert_eq!(config.fit_policy, FitPolicy::PadLetterbox);
        assert_eq!(config.pad_background, PadBackground::blur());
        assert_eq!(config.max_encodes_per_job, 2);
    }

    #[test]
    fn test_from_env_saturates_large_units() {
        std::env::set_var("SHORTS_MAX_SOURCE_MB", u64::MAX.to_string());
        std::env::set_var("SHORTS_STALE_AFTER_HOURS", u64::MAX.to_string());

        let config = WorkerConfig::from_env();

        std::env::remove_var("SHORTS_MAX_SOURCE_MB");
        std::env::remove_var("SHORTS_STALE_AFTER_HOURS");

        assert_eq!(config.max_source_bytes, u64::MAX);
        assert_eq!(config.stale_after, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_clip_retry_policy() {
        let config = WorkerConfig::default();
        let retry = config.clip_retry();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.base_delay, Duration::from_millis(500));
        assert_eq!(retry.max_delay, Duration::from_secs(5));
    }
}

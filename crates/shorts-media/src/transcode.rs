//! Per-clip encoding.
//!
//! One encoder invocation renders one [`ClipSpec`]: input seek to the span
//! start, read exactly the span length, apply the geometry filter graph and
//! the fixed encoding profile. The result is verified against the requested
//! span before it is reported as ready.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shorts_models::{Clip, ClipSpec, EncodingConfig};

use crate::aspect::GeometryTransform;
use crate::command::{wait_cancelled, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::MediaProbe;

/// Default accepted difference between requested and measured duration.
pub const DEFAULT_DURATION_TOLERANCE_SECS: f64 = 0.5;

/// Wall-clock limit for one encode, proportional to the clip length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub per_second: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            per_second: Duration::from_secs(6),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_span(&self, span_secs: f64) -> Duration {
        self.base + self.per_second.mul_f64(span_secs.max(0.0))
    }
}

/// Everything needed to render one clip.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: PathBuf,
    pub spec: ClipSpec,
    pub transform: GeometryTransform,
    pub output: PathBuf,
}

impl RenderRequest {
    /// The request with a solid pad in place of a blurred background.
    pub fn plain_fallback(&self) -> Option<RenderRequest> {
        self.transform.plain_fallback().map(|transform| RenderRequest {
            transform,
            ..self.clone()
        })
    }
}

/// Renders a single clip. Implemented by [`Transcoder`]; the seam exists so
/// orchestration can be exercised without an encoder.
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    /// Render `request`, returning a `Ready` clip with the measured duration.
    ///
    /// Setting the cancel flag terminates the encoder and yields `Cancelled`.
    async fn render(
        &self,
        request: &RenderRequest,
        cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<Clip>;
}

/// FFmpeg-backed [`ClipRenderer`].
pub struct Transcoder {
    encoding: EncodingConfig,
    timeout: TimeoutPolicy,
    tolerance: f64,
    probe: Arc<dyn MediaProbe>,
    ffmpeg: PathBuf,
}

impl Transcoder {
    pub fn new(encoding: EncodingConfig, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            encoding,
            timeout: TimeoutPolicy::default(),
            tolerance: DEFAULT_DURATION_TOLERANCE_SECS,
            probe,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_timeout_policy(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_ffmpeg(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    /// Build the encoder command for a request.
    pub fn build_command(&self, request: &RenderRequest) -> FfmpegCommand {
        FfmpegCommand::new(&request.source, &request.output)
            .seek(request.spec.start)
            .duration(request.spec.span())
            .video_filter(request.transform.filter_graph())
            .map("0:v:0")
            .map("0:a:0?")
            .output_args(self.encoding.to_ffmpeg_args())
    }

    /// Check an encoded file against its spec. The output probe is bounded
    /// by the base encode timeout and stops on cancellation.
    async fn verify(
        &self,
        spec: &ClipSpec,
        output: &Path,
        cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<f64> {
        let metadata = tokio::fs::metadata(output)
            .await
            .map_err(|_| MediaError::verification(format!("{} was not created", output.display())))?;
        if metadata.len() == 0 {
            return Err(MediaError::verification(format!(
                "{} is empty",
                output.display()
            )));
        }

        let limit = self.timeout.base;
        let probed = tokio::select! {
            biased;
            _ = wait_cancelled(Some(cancel_rx)) => return Err(MediaError::Cancelled),
            probed = tokio::time::timeout(limit, self.probe.probe(output)) => probed,
        };
        let info = probed
            .map_err(|_| {
                MediaError::verification(format!(
                    "probe of output timed out after {}s",
                    limit.as_secs_f64()
                ))
            })?
            .map_err(|e| MediaError::verification(format!("cannot probe output: {}", e)))?;

        let expected = spec.span();
        if (info.duration - expected).abs() > self.tolerance {
            return Err(MediaError::verification(format!(
                "duration {:.3}s differs from requested {:.3}s by more than {:.2}s",
                info.duration, expected, self.tolerance
            )));
        }
        Ok(info.duration)
    }
}

#[async_trait]
impl ClipRenderer for Transcoder {
    async fn render(
        &self,
        request: &RenderRequest,
        cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<Clip> {
        let spec = &request.spec;
        let span = spec.span();
        let timeout = self.timeout.for_span(span);

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            job_id = %spec.job_id,
            clip_index = spec.index,
            span = %spec.span_label(),
            timeout_secs = timeout.as_secs(),
            "Encoding clip"
        );

        let cmd = self.build_command(request);
        let verify_cancel = cancel_rx.clone();
        let runner = FfmpegRunner::new()
            .with_program(&self.ffmpeg)
            .with_timeout(timeout)
            .with_cancel(cancel_rx);

        let job_id = spec.job_id.clone();
        let clip_index = spec.index;
        let result = runner
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    job_id = %job_id,
                    clip_index,
                    percent = progress.percentage(span),
                    speed = progress.speed,
                    "Encode progress"
                );
            })
            .await;

        let verified = match result {
            Ok(()) => self.verify(spec, &request.output, verify_cancel).await,
            Err(e) => Err(e),
        };

        match verified {
            Ok(duration) => {
                info!(
                    job_id = %spec.job_id,
                    clip_index = spec.index,
                    duration,
                    "Clip ready"
                );
                Ok(Clip::ready(spec.clone(), &request.output, duration))
            }
            Err(e) => {
                // Never leave a partial file behind for the next attempt
                if let Err(rm) = tokio::fs::remove_file(&request.output).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "Failed to remove partial output {}: {}",
                            request.output.display(),
                            rm
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::plan_geometry;
    use crate::probe::{FfprobeProbe, VideoInfo};
    use shorts_models::{FitPolicy, JobId, OutputFormat, PadBackground};

    struct FixedProbe(f64);

    #[async_trait]
    impl MediaProbe for FixedProbe {
        async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
            Ok(VideoInfo {
                duration: self.0,
                width: 1080,
                height: 1920,
                fps: 30.0,
                codec: "h264".to_string(),
                size: 1,
                bitrate: 0,
            })
        }
    }

    fn request(dir: &Path, start: f64, end: f64) -> RenderRequest {
        RenderRequest {
            source: dir.join("talk.mp4"),
            spec: ClipSpec {
                job_id: JobId::from_string("abcd1234"),
                index: 3,
                start,
                end,
            },
            transform: plan_geometry(
                1920,
                1080,
                OutputFormat::default(),
                FitPolicy::CropFill,
                &PadBackground::default(),
            )
            .unwrap(),
            output: dir.join("clips").join("talk_part04.mp4"),
        }
    }

    #[test]
    fn test_timeout_policy() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.for_span(50.0), Duration::from_secs(360));
        assert_eq!(policy.for_span(0.0), Duration::from_secs(60));
    }

    #[test]
    fn test_build_command() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(EncodingConfig::default(), Arc::new(FixedProbe(35.0)));
        let args = transcoder.build_command(&request(dir.path(), 150.0, 185.0)).build_args();

        let input = args.iter().position(|a| a == "-i").unwrap();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert!(ss < input && t < input);
        assert_eq!(args[ss + 1], "150.000");
        assert_eq!(args[t + 1], "35.000");

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with("scale=3414:1920"));
        assert!(args.contains(&"0:a:0?".to_string()));
        assert!(args.contains(&"libx264".to_string()));
    }

    struct HangingProbe;

    #[async_trait]
    impl MediaProbe for HangingProbe {
        async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_and_short_output() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), 0.0, 50.0);
        let (_tx, rx) = watch::channel(false);

        let transcoder = Transcoder::new(EncodingConfig::default(), Arc::new(FixedProbe(50.2)));
        let err = transcoder.verify(&req.spec, &req.output, rx.clone()).await.unwrap_err();
        assert!(matches!(err, MediaError::EncodeVerification(_)));

        tokio::fs::create_dir_all(req.output.parent().unwrap()).await.unwrap();
        tokio::fs::write(&req.output, b"").await.unwrap();
        let err = transcoder.verify(&req.spec, &req.output, rx.clone()).await.unwrap_err();
        assert!(err.to_string().contains("empty"));

        tokio::fs::write(&req.output, b"not really mp4").await.unwrap();
        let duration = transcoder.verify(&req.spec, &req.output, rx.clone()).await.unwrap();
        assert!((duration - 50.2).abs() < 1e-9);

        let short = Transcoder::new(EncodingConfig::default(), Arc::new(FixedProbe(42.0)));
        let err = short.verify(&req.spec, &req.output, rx.clone()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_verify_stops_on_cancel_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), 0.0, 50.0);
        tokio::fs::create_dir_all(req.output.parent().unwrap()).await.unwrap();
        tokio::fs::write(&req.output, b"encoded").await.unwrap();

        let transcoder = Transcoder::new(EncodingConfig::default(), Arc::new(HangingProbe))
            .with_timeout_policy(TimeoutPolicy {
                base: Duration::from_millis(50),
                per_second: Duration::ZERO,
            });

        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        let err = transcoder.verify(&req.spec, &req.output, rx).await.unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));

        let (_tx, rx) = watch::channel(false);
        let err = transcoder.verify(&req.spec, &req.output, rx).await.unwrap_err();
        assert!(matches!(err, MediaError::EncodeVerification(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_encoder_failure_removes_partial_output() {
        let Ok(sh) = which::which("false") else { return };
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), 0.0, 10.0);
        tokio::fs::create_dir_all(req.output.parent().unwrap()).await.unwrap();
        tokio::fs::write(&req.output, b"partial").await.unwrap();

        let transcoder =
            Transcoder::new(EncodingConfig::default(), Arc::new(FixedProbe(10.0))).with_ffmpeg(sh);
        let (_tx, rx) = watch::channel(false);
        let err = transcoder.render(&req, rx).await.unwrap_err();
        assert!(matches!(err, MediaError::EncodeFailed { exit_code: Some(1), .. }));
        assert!(!req.output.exists());
    }

    /// Full encode of a synthetic landscape source. Skipped without ffmpeg.
    #[tokio::test]
    async fn test_render_with_ffmpeg() {
        if which::which("ffmpeg").is_err() || which::which("ffprobe").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("talk.mp4");
        let status = tokio::process::Command::new("ffmpeg")
            .args([
                "-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=size=320x180:rate=30",
                "-f", "lavfi", "-i", "sine=frequency=440", "-t", "4", "-c:v", "libx264",
                "-c:a", "aac", "-shortest",
            ])
            .arg(&source)
            .status()
            .await
            .unwrap();
        if !status.success() {
            return;
        }

        let mut req = request(dir.path(), 1.0, 3.0);
        req.transform = plan_geometry(
            320,
            180,
            OutputFormat::new(180, 320),
            FitPolicy::PadLetterbox,
            &PadBackground::blur(),
        )
        .unwrap();

        let transcoder = Transcoder::new(EncodingConfig::default(), Arc::new(FfprobeProbe::new()));
        let (_tx, rx) = watch::channel(false);
        let clip = transcoder.render(&req, rx).await.unwrap();
        assert!(clip.is_ready());
        assert!((clip.duration.unwrap() - 2.0).abs() <= DEFAULT_DURATION_TOLERANCE_SECS);

        let info = crate::probe::probe_video(&clip.path).await.unwrap();
        assert_eq!((info.width, info.height), (180, 320));
    }
}

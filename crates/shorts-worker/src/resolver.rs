//! Source resolution.
//!
//! Turns a user reference (remote URL or uploaded file) into a local file
//! inside the job's scratch directory, probes it, and checks it against the
//! configured source limits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use shorts_media::fs_utils::{copy_file, sanitize_filename};
use shorts_media::{MediaError, MediaProbe, SourceFetcher};
use shorts_models::SourceVideo;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// What the user asked us to process.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReference {
    /// Remote video page or file, fetched by the downloader
    Url(Url),
    /// A file already on this machine (an upload)
    Upload(PathBuf),
}

impl SourceReference {
    /// Classify raw user input.
    ///
    /// `http(s)` URLs are remote, `file://` URLs and bare paths are uploads,
    /// anything else with a scheme is rejected.
    pub fn parse(input: &str) -> WorkerResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(WorkerError::resolution("empty source reference"));
        }

        match Url::parse(input) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(SourceReference::Url(url)),
                "file" => url
                    .to_file_path()
                    .map(SourceReference::Upload)
                    .map_err(|_| WorkerError::resolution(format!("invalid file URL: {}", input))),
                // Windows drive letters parse as one-letter schemes
                scheme if scheme.len() == 1 => Ok(SourceReference::Upload(PathBuf::from(input))),
                scheme => Err(WorkerError::resolution(format!(
                    "unsupported reference scheme '{}': {}",
                    scheme, input
                ))),
            },
            Err(_) => Ok(SourceReference::Upload(PathBuf::from(input))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceReference::Url(_))
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceReference::Url(url) => write!(f, "{}", url),
            SourceReference::Upload(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Limits applied to every resolved source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceLimits {
    pub max_bytes: u64,
    pub max_duration: f64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            max_bytes: 500 * 1024 * 1024,
            max_duration: 3600.0,
        }
    }
}

impl SourceLimits {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_bytes: config.max_source_bytes,
            max_duration: config.max_source_duration,
        }
    }
}

/// Resolves references into probed [`SourceVideo`]s.
#[derive(Clone)]
pub struct SourceResolver {
    fetcher: Arc<dyn SourceFetcher>,
    probe: Arc<dyn MediaProbe>,
    limits: SourceLimits,
}

impl SourceResolver {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            fetcher,
            probe,
            limits: SourceLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> SourceLimits {
        self.limits
    }

    /// Bring the source into `downloads_dir` and describe it.
    ///
    /// Every failure is a [`WorkerError::Resolution`].
    pub async fn resolve(
        &self,
        reference: &SourceReference,
        downloads_dir: &Path,
    ) -> WorkerResult<SourceVideo> {
        let path = match reference {
            SourceReference::Url(url) => self
                .fetcher
                .fetch(url.as_str(), downloads_dir)
                .await
                .map_err(resolution_error)?,
            SourceReference::Upload(path) => self.import_upload(path, downloads_dir).await?,
        };

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| WorkerError::resolution(format!("{}: {}", path.display(), e)))?
            .len();
        if size_bytes > self.limits.max_bytes {
            return Err(WorkerError::resolution(format!(
                "source is {:.1} MB, limit is {:.1} MB",
                megabytes(size_bytes),
                megabytes(self.limits.max_bytes)
            )));
        }

        let info = self.probe.probe(&path).await.map_err(resolution_error)?;
        if info.duration > self.limits.max_duration {
            return Err(WorkerError::resolution(format!(
                "source is {:.0}s long, limit is {:.0}s",
                info.duration, self.limits.max_duration
            )));
        }

        info!(
            source = %path.display(),
            duration = info.duration,
            width = info.width,
            height = info.height,
            fps = info.fps,
            codec = %info.codec,
            "Resolved source"
        );

        Ok(SourceVideo {
            path,
            duration: info.duration,
            width: info.width,
            height: info.height,
            frame_rate: info.fps,
            codec: info.codec,
            size_bytes,
        })
    }

    /// Copy an uploaded file into the scratch directory under a safe name.
    async fn import_upload(&self, path: &Path, downloads_dir: &Path) -> WorkerResult<PathBuf> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| WorkerError::resolution(format!("{}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(WorkerError::resolution(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if metadata.len() > self.limits.max_bytes {
            return Err(WorkerError::resolution(format!(
                "upload is {:.1} MB, limit is {:.1} MB",
                megabytes(metadata.len()),
                megabytes(self.limits.max_bytes)
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = downloads_dir.join(sanitize_filename(&name));
        let bytes = copy_file(path, &dest).await.map_err(resolution_error)?;
        debug!(
            from = %path.display(),
            to = %dest.display(),
            bytes,
            "Imported upload"
        );
        Ok(dest)
    }
}

fn resolution_error(e: MediaError) -> WorkerError {
    WorkerError::Resolution(e.to_string())
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

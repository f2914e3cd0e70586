//! Video download using yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::StderrTail;
use crate::error::{MediaError, MediaResult};

/// Output template: title capped at 100 characters, then the video id.
pub const OUTPUT_TEMPLATE: &str = "%(title).100s-%(id)s.%(ext)s";

/// Default download timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fetches a remote reference into a local directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest_dir` and return the local file path.
    ///
    /// Fails with `SourceUnreachable`, `UnsupportedFormat` or `QuotaExceeded`.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<PathBuf>;
}

/// [`SourceFetcher`] backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
    max_height: u32,
    timeout: Duration,
    max_filesize: Option<u64>,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            max_height: 1080,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            max_filesize: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Let yt-dlp abort downloads larger than `bytes` up front.
    pub fn with_max_filesize(mut self, bytes: u64) -> Self {
        self.max_filesize = Some(bytes);
        self
    }

    /// Arguments for one download.
    pub fn build_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            format!("best[height<={}]/best", self.max_height),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--restrict-filenames".to_string(),
        ];
        if let Some(bytes) = self.max_filesize {
            args.push("--max-filesize".to_string());
            args.push(bytes.to_string());
        }
        args.push("-o".to_string());
        args.push(dest_dir.join(OUTPUT_TEMPLATE).to_string_lossy().to_string());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> MediaResult<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        info!(url = %url, dest = %dest_dir.display(), "Downloading source with yt-dlp");
        let started = SystemTime::now();

        let child = Command::new(&self.program)
            .args(self.build_args(url, dest_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::YtDlpNotFound,
                _ => MediaError::Io(e),
            })?,
            Err(_) => {
                warn!(url = %url, "yt-dlp timed out after {:?}", self.timeout);
                return Err(MediaError::SourceUnreachable(format!(
                    "download timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            return Err(classify_failure(&stderr));
        }

        let path = newest_media_file(dest_dir, started)
            .await?
            .ok_or_else(|| MediaError::SourceUnreachable("yt-dlp did not produce a file".to_string()))?;

        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            output = %path.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Downloaded source"
        );
        Ok(path)
    }
}

/// Map yt-dlp diagnostics onto the fetch error taxonomy.
pub fn classify_failure(stderr: &str) -> MediaError {
    let message = StderrTail::from_text(stderr, 1).into_string();
    let message = if message.is_empty() {
        "yt-dlp failed".to_string()
    } else {
        message
    };
    let lower = stderr.to_lowercase();

    if lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("quota")
        || lower.contains("sign in to confirm")
    {
        MediaError::QuotaExceeded(message)
    } else if lower.contains("unsupported url")
        || lower.contains("no video formats found")
        || lower.contains("requested format is not available")
        || lower.contains("max-filesize")
        || lower.contains("larger than max-filesize")
    {
        MediaError::UnsupportedFormat(message)
    } else {
        MediaError::SourceUnreachable(message)
    }
}

/// Most recently modified finished download in `dir`, ignoring partial files.
async fn newest_media_file(dir: &Path, since: SystemTime) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(since);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

/// Check if a reference looks like something yt-dlp can fetch.
pub fn is_supported_url(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

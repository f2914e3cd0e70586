//! Per-job scratch directories.
//!
//! Layout: `<work_dir>/<job_id>/downloads` for the source and
//! `<work_dir>/<job_id>/clips` for encoded clips. Nothing outside a job's
//! own directory is written while the job runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info, warn};

use shorts_models::{ClipSpec, JobId};

use crate::error::WorkerResult;

/// A job's private scratch directory.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create the directory tree for a job.
    pub async fn create(work_dir: &Path, job_id: &JobId) -> WorkerResult<Self> {
        let scratch = Self {
            root: work_dir.join(job_id.as_str()),
        };
        fs::create_dir_all(scratch.downloads_dir()).await?;
        fs::create_dir_all(scratch.clips_dir()).await?;
        debug!(path = %scratch.root.display(), "Created scratch directory");
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    /// Where the clip for `spec` is encoded.
    pub fn clip_path(&self, spec: &ClipSpec, stem: &str) -> PathBuf {
        self.clips_dir().join(spec.file_name(stem))
    }

    /// Drop the source and any other intermediates, keeping encoded clips.
    pub async fn remove_intermediates(&self) -> WorkerResult<()> {
        remove_dir_if_exists(&self.downloads_dir()).await
    }

    /// Remove individual files, e.g. clips whose transfer was confirmed.
    /// Paths outside this job's directory are left alone.
    pub async fn remove_files(&self, paths: &[PathBuf]) -> WorkerResult<()> {
        for path in paths.iter().filter(|p| p.starts_with(&self.root)) {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove the whole directory.
    pub async fn cleanup(self) -> WorkerResult<()> {
        remove_dir_if_exists(&self.root).await?;
        debug!(path = %self.root.display(), "Removed scratch directory");
        Ok(())
    }
}

async fn remove_dir_if_exists(path: &Path) -> WorkerResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove job directories under `work_dir` last modified more than
/// `max_age` ago. Returns the number removed.
pub async fn sweep_stale(work_dir: &Path, max_age: Duration) -> WorkerResult<usize> {
    let mut entries = match fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry.path().display(), "Cannot stat scratch entry: {}", e);
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|t| t.elapsed().ok())
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => {
                removed += 1;
                debug!(path = %entry.path().display(), age_secs = age.as_secs(), "Removed stale scratch directory");
            }
            Err(e) => warn!(path = %entry.path().display(), "Failed to remove stale scratch directory: {}", e),
        }
    }

    if removed > 0 {
        info!(removed, work_dir = %work_dir.display(), "Swept stale scratch directories");
    }
    Ok(removed)
}

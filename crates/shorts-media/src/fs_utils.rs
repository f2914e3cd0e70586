//! Filesystem utilities for copying media files.
//!
//! Copies land in a temporary sibling first and are renamed into place, so a
//! reader never sees a half-written file under the final name.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Maximum length of a sanitized file name.
pub const MAX_FILENAME_LEN: usize = 100;

/// Copy `src` to `dst` via a temporary file next to `dst`.
pub async fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    ensure_parent(dst).await?;

    let tmp_dst = dst.with_extension("tmp");
    let bytes = fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    Ok(bytes)
}

/// Reduce an arbitrary file name to `[A-Za-z0-9._-]`, at most
/// [`MAX_FILENAME_LEN`] characters, with any directory components dropped.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    // Never produce "", "." or ".." (or other dot-only names)
    if clean.chars().all(|c| c == '.') {
        clean = format!("upload{}", clean.len());
    }
    clean
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

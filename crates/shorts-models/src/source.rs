//! Source video descriptor.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A fully available local source file with probed metadata.
///
/// Lives inside the owning job's scratch directory and is removed with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceVideo {
    /// Local file path
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub frame_rate: f64,
    /// Video codec name as reported by the probe
    #[serde(default)]
    pub codec: String,
    /// File size in bytes
    #[serde(default)]
    pub size_bytes: u64,
}

impl SourceVideo {
    /// Width / height, or `None` for degenerate frames.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(self.width as f64 / self.height as f64)
    }

    /// File stem used to name derived clips.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "source".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, width: u32, height: u32) -> SourceVideo {
        SourceVideo {
            path: PathBuf::from(path),
            duration: 185.0,
            width,
            height,
            frame_rate: 30.0,
            codec: "h264".to_string(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_aspect_ratio() {
        let s = source("/work/a/downloads/talk.mp4", 1920, 1080);
        assert!((s.aspect_ratio().unwrap() - 16.0 / 9.0).abs() < 1e-9);
        assert!(source("/x.mp4", 0, 1080).aspect_ratio().is_none());
    }

    #[test]
    fn test_stem() {
        assert_eq!(source("/work/a/downloads/talk.mp4", 1, 1).stem(), "talk");
        assert_eq!(source("/", 1, 1).stem(), "source");
    }
}

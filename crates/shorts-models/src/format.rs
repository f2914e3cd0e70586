//! Output frame format and fit policy definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default output width (9:16 portrait).
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1080;
/// Default output height (9:16 portrait).
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 1920;
/// Default blur strength for blurred pad backgrounds.
pub const DEFAULT_BLUR_SIGMA: f32 = 20.0;

/// Fixed output frame resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            width: DEFAULT_OUTPUT_WIDTH,
            height: DEFAULT_OUTPUT_HEIGHT,
        }
    }
}

impl OutputFormat {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 9:16 frame for a given height, e.g. 1920 -> 1080x1920.
    pub fn portrait_for_height(height: u32) -> Self {
        // Keep the width even for yuv420p
        let width = ((height as f64 * 9.0 / 16.0) / 2.0).round() as u32 * 2;
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for OutputFormat {
    type Err = FormatParseError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1080x1920`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(|c| c == 'x' || c == 'X')
            .ok_or_else(|| FormatParseError::Resolution(s.to_string()))?;
        let width: u32 = w
            .parse()
            .map_err(|_| FormatParseError::Resolution(s.to_string()))?;
        let height: u32 = h
            .parse()
            .map_err(|_| FormatParseError::Resolution(s.to_string()))?;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(FormatParseError::Resolution(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

/// Strategy for mapping a source frame into the fixed output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitPolicy {
    /// Scale to cover the frame, center-crop the overflow
    #[default]
    CropFill,
    /// Scale to fit inside the frame, pad the remainder
    PadLetterbox,
    /// Pick crop or pad per source aspect ratio
    Adaptive,
}

impl FitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitPolicy::CropFill => "crop-fill",
            FitPolicy::PadLetterbox => "pad-letterbox",
            FitPolicy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FitPolicy {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "crop-fill" | "crop" | "fill" => Ok(FitPolicy::CropFill),
            "pad-letterbox" | "pad" | "letterbox" => Ok(FitPolicy::PadLetterbox),
            "adaptive" | "auto" => Ok(FitPolicy::Adaptive),
            _ => Err(FormatParseError::FitPolicy(s.to_string())),
        }
    }
}

/// Fill used for the padded area in letterbox mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PadBackground {
    /// Solid color understood by ffmpeg (`black`, `white`, `#202020`, ...)
    Solid { color: String },
    /// Blurred, enlarged copy of the source frame
    Blur { sigma: f32 },
}

impl Default for PadBackground {
    fn default() -> Self {
        PadBackground::Solid {
            color: "black".to_string(),
        }
    }
}

impl PadBackground {
    pub fn blur() -> Self {
        PadBackground::Blur {
            sigma: DEFAULT_BLUR_SIGMA,
        }
    }
}

impl fmt::Display for PadBackground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadBackground::Solid { color } => write!(f, "{}", color),
            PadBackground::Blur { sigma } => write!(f, "blur:{}", sigma),
        }
    }
}

impl FromStr for PadBackground {
    type Err = FormatParseError;

    /// Accepts `blur`, `blur:<sigma>` or a color name / `#RRGGBB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_lowercase();
        if lower == "blur" {
            return Ok(PadBackground::blur());
        }
        if let Some(sigma) = lower.strip_prefix("blur:") {
            let sigma: f32 = sigma
                .parse()
                .map_err(|_| FormatParseError::Background(s.to_string()))?;
            if !(sigma > 0.0) {
                return Err(FormatParseError::Background(s.to_string()));
            }
            return Ok(PadBackground::Blur { sigma });
        }

        // Colors end up inside a filter graph, keep them to a safe charset
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '#' || c == '@' || c == '.');
        if !valid {
            return Err(FormatParseError::Background(s.to_string()));
        }
        Ok(PadBackground::Solid {
            color: s.to_string(),
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatParseError {
    #[error("Invalid resolution (expected even WIDTHxHEIGHT): {0}")]
    Resolution(String),

    #[error("Unknown fit policy: {0}")]
    FitPolicy(String),

    #[error("Invalid pad background: {0}")]
    Background(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_format() {
        let format = OutputFormat::default();
        assert_eq!(format.to_string(), "1080x1920");
        assert!((format.aspect_ratio() - 9.0 / 16.0).abs() < 1e-9);
        assert_eq!(OutputFormat::portrait_for_height(1920), format);
        assert_eq!(OutputFormat::portrait_for_height(1280), OutputFormat::new(720, 1280));
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!("720x1280".parse::<OutputFormat>().unwrap(), OutputFormat::new(720, 1280));
        assert!("0x1920".parse::<OutputFormat>().is_err());
        assert!("1081x1920".parse::<OutputFormat>().is_err());
        assert!("wide".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_fit_policy() {
        assert_eq!("crop-fill".parse::<FitPolicy>().unwrap(), FitPolicy::CropFill);
        assert_eq!("PAD_LETTERBOX".parse::<FitPolicy>().unwrap(), FitPolicy::PadLetterbox);
        assert_eq!("adaptive".parse::<FitPolicy>().unwrap(), FitPolicy::Adaptive);
        assert!("stretch".parse::<FitPolicy>().is_err());
    }

    #[test]
    fn test_parse_pad_background() {
        assert_eq!("blur".parse::<PadBackground>().unwrap(), PadBackground::blur());
        assert_eq!(
            "blur:35".parse::<PadBackground>().unwrap(),
            PadBackground::Blur { sigma: 35.0 }
        );
        assert_eq!(
            "#202020".parse::<PadBackground>().unwrap(),
            PadBackground::Solid {
                color: "#202020".to_string()
            }
        );
        assert!("black;drawtext".parse::<PadBackground>().is_err());
        assert!("blur:-1".parse::<PadBackground>().is_err());
    }

    #[test]
    fn test_fit_policy_serde() {
        let json = serde_json::to_string(&FitPolicy::PadLetterbox).unwrap();
        assert_eq!(json, "\"pad-letterbox\"");
    }
}

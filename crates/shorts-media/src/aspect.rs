//! Source-to-portrait geometry.
//!
//! Maps an arbitrary source frame into the fixed output frame with a single
//! uniform scale, then either center-crops the overflow or pads the remainder.
//! Scaled sizes are rounded to even pixel counts for yuv420p; the output frame
//! is always exactly the target resolution.

use serde::{Deserialize, Serialize};
use shorts_models::{FitPolicy, OutputFormat, PadBackground};

use crate::error::{MediaError, MediaResult};

/// Sources wider than this use crop-fill under the adaptive policy.
pub const ADAPTIVE_WIDE_ASPECT: f64 = 1.7;
/// Sources narrower than this use a solid letterbox under the adaptive policy.
pub const ADAPTIVE_TALL_ASPECT: f64 = 0.7;

/// Crop rectangle inside the scaled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How the scaled frame is brought to the output size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Fit {
    /// Scaled frame covers the output; the overflow is cut away
    Crop(CropRect),
    /// Scaled frame sits inside the output at `(x, y)`
    Pad {
        x: u32,
        y: u32,
        background: PadBackground,
    },
}

/// Scale/crop/pad parameters for one source geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryTransform {
    pub source_width: u32,
    pub source_height: u32,
    pub target: OutputFormat,
    /// Uniform scale factor applied to the source
    pub scale: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub fit: Fit,
}

impl GeometryTransform {
    /// Policy this transform implements (never `Adaptive`).
    pub fn policy(&self) -> FitPolicy {
        match self.fit {
            Fit::Crop(_) => FitPolicy::CropFill,
            Fit::Pad { .. } => FitPolicy::PadLetterbox,
        }
    }

    /// Output frame size produced by [`filter_graph`](Self::filter_graph).
    pub fn output_size(&self) -> (u32, u32) {
        match &self.fit {
            Fit::Crop(rect) => (rect.width, rect.height),
            Fit::Pad { .. } => (self.target.width, self.target.height),
        }
    }

    /// Same geometry over a solid black pad, for when the encoder rejects the
    /// blurred-background graph. `None` if the transform has no blur.
    pub fn plain_fallback(&self) -> Option<GeometryTransform> {
        match &self.fit {
            Fit::Pad {
                x,
                y,
                background: PadBackground::Blur { .. },
            } => Some(GeometryTransform {
                fit: Fit::Pad {
                    x: *x,
                    y: *y,
                    background: PadBackground::default(),
                },
                ..self.clone()
            }),
            _ => None,
        }
    }

    /// Render as an FFmpeg `-vf` filter graph.
    pub fn filter_graph(&self) -> String {
        let (tw, th) = (self.target.width, self.target.height);
        let (sw, sh) = (self.scaled_width, self.scaled_height);

        match &self.fit {
            Fit::Crop(rect) => format!(
                "scale={sw}:{sh}:flags=lanczos,crop={w}:{h}:{x}:{y},setsar=1",
                w = rect.width,
                h = rect.height,
                x = rect.x,
                y = rect.y,
            ),
            Fit::Pad {
                x,
                y,
                background: PadBackground::Solid { color },
            } => format!(
                "scale={sw}:{sh}:flags=lanczos,pad={tw}:{th}:{x}:{y}:color={color},setsar=1"
            ),
            Fit::Pad {
                x,
                y,
                background: PadBackground::Blur { sigma },
            } => format!(
                // Background: source scaled to cover the frame, blurred
                "split=2[bg][fg];\
                 [bg]scale={tw}:{th}:force_original_aspect_ratio=increase:flags=lanczos,\
                 crop={tw}:{th},gblur=sigma={sigma}[bg];\
                 [fg]scale={sw}:{sh}:flags=lanczos[fg];\
                 [bg][fg]overlay={x}:{y},setsar=1"
            ),
        }
    }
}

/// Computes geometry transforms for a configured output frame and policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectConverter {
    target: OutputFormat,
    policy: FitPolicy,
    background: PadBackground,
}

impl AspectConverter {
    pub fn new(target: OutputFormat, policy: FitPolicy, background: PadBackground) -> Self {
        Self {
            target,
            policy,
            background,
        }
    }

    /// Plan the transform for a source frame size.
    pub fn plan(&self, source_width: u32, source_height: u32) -> MediaResult<GeometryTransform> {
        plan_geometry(
            source_width,
            source_height,
            self.target,
            self.policy,
            &self.background,
        )
    }
}

/// Round to the nearest even integer.
fn round_even(value: f64) -> u32 {
    ((value / 2.0).round() as u32) * 2
}

/// Round down to an even integer.
fn floor_even(value: f64) -> u32 {
    ((value / 2.0).floor() as u32) * 2
}

/// Plan the transform for a source frame size.
///
/// `Adaptive` is resolved here: wide sources crop, tall sources get a solid
/// letterbox, everything in between a blurred letterbox. A configured solid
/// color or blur strength is reused where it fits the resolved background.
pub fn plan_geometry(
    source_width: u32,
    source_height: u32,
    target: OutputFormat,
    policy: FitPolicy,
    background: &PadBackground,
) -> MediaResult<GeometryTransform> {
    if source_width == 0 || source_height == 0 {
        return Err(MediaError::invalid_geometry(format!(
            "source frame is {}x{}",
            source_width, source_height
        )));
    }
    if target.width == 0 || target.height == 0 || target.width % 2 != 0 || target.height % 2 != 0 {
        return Err(MediaError::invalid_geometry(format!(
            "target frame must be non-zero and even, got {}",
            target
        )));
    }

    match policy {
        FitPolicy::CropFill => Ok(crop_fill(source_width, source_height, target)),
        FitPolicy::PadLetterbox => Ok(pad_letterbox(
            source_width,
            source_height,
            target,
            background.clone(),
        )),
        FitPolicy::Adaptive => {
            let aspect = source_width as f64 / source_height as f64;
            if aspect > ADAPTIVE_WIDE_ASPECT {
                Ok(crop_fill(source_width, source_height, target))
            } else if aspect < ADAPTIVE_TALL_ASPECT {
                let solid = match background {
                    PadBackground::Solid { .. } => background.clone(),
                    PadBackground::Blur { .. } => PadBackground::default(),
                };
                Ok(pad_letterbox(source_width, source_height, target, solid))
            } else {
                let blur = match background {
                    PadBackground::Blur { .. } => background.clone(),
                    PadBackground::Solid { .. } => PadBackground::blur(),
                };
                Ok(pad_letterbox(source_width, source_height, target, blur))
            }
        }
    }
}

fn crop_fill(sw: u32, sh: u32, target: OutputFormat) -> GeometryTransform {
    let (tw, th) = (target.width, target.height);
    let scale_x = tw as f64 / sw as f64;
    let scale_y = th as f64 / sh as f64;
    let scale = scale_x.max(scale_y);

    // One axis matches the target exactly, the other covers it
    let (scaled_width, scaled_height) = if scale_x >= scale_y {
        (tw, round_even(sh as f64 * scale).max(th))
    } else {
        (round_even(sw as f64 * scale).max(tw), th)
    };

    GeometryTransform {
        source_width: sw,
        source_height: sh,
        target,
        scale,
        scaled_width,
        scaled_height,
        fit: Fit::Crop(CropRect {
            x: (scaled_width - tw) / 2,
            y: (scaled_height - th) / 2,
            width: tw,
            height: th,
        }),
    }
}

fn pad_letterbox(
    sw: u32,
    sh: u32,
    target: OutputFormat,
    background: PadBackground,
) -> GeometryTransform {
    let (tw, th) = (target.width, target.height);
    let scale_x = tw as f64 / sw as f64;
    let scale_y = th as f64 / sh as f64;
    let scale = scale_x.min(scale_y);

    // One axis matches the target exactly, the other fits inside it
    let (scaled_width, scaled_height) = if scale_x <= scale_y {
        (tw, floor_even(sh as f64 * scale).clamp(2, th))
    } else {
        (floor_even(sw as f64 * scale).clamp(2, tw), th)
    };

    // Even offsets keep chroma planes aligned
    let x = ((tw - scaled_width) / 2) & !1;
    let y = ((th - scaled_height) / 2) & !1;

    GeometryTransform {
        source_width: sw,
        source_height: sh,
        target,
        scale,
        scaled_width,
        scaled_height,
        fit: Fit::Pad { x, y, background },
    }
}

// SPDX-License-Identifier: MIT
//! # Scaling Plan Computation
//!
//! Computes output dimensions for provider-bound images. Two target shapes are
//! supported:
//!
//! - **Within**: fit inside a width × height bounding box (the gateway default)
//! - **MaxLongSide**: clamp the longest side, derive the other proportionally
//!
//! Both preserve aspect ratio and never upscale: an image already inside the
//! target produces an identity plan, which callers use to skip the resize.
//!
//! All computations use floating-point for precision but round to integers,
//! clamped to a minimum of 1px.

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

/// Target size constraint for a scaling plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleTarget {
    /// Fit entirely within the given box.
    Within(Size),
    /// Clamp the longest side to this many pixels.
    MaxLongSide(u32),
}

/// Resampling filter used by the CPU scaler.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    /// Sharpest downscale; best for UI text in screenshots
    #[default]
    Lanczos3,
    /// Faster, slightly softer
    Bilinear,
    /// Fastest; blocky, only for previews
    Nearest,
}

/// Complete scaling plan computed from input parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScalePlan {
    /// Original input dimensions
    pub input: Size,
    /// Target size constraint used for planning
    pub target: ScaleTarget,
    /// Final computed output dimensions
    pub out: Size,
}

impl ScalePlan {
    /// True when the output equals the input and no resampling is needed.
    pub fn is_identity(&self) -> bool {
        self.input == self.out
    }

    /// Byte length of a tightly packed RGB8 output buffer.
    pub fn output_len(&self) -> usize {
        (self.out.w as usize) * (self.out.h as usize) * 3
    }
}

/// Compute a scaling plan for `input` under `target`.
pub fn build_plan(input: Size, target: ScaleTarget) -> ScalePlan {
    let (w, h) = match target {
        ScaleTarget::Within(bounds) => fit_within(input, bounds),
        ScaleTarget::MaxLongSide(max_side) => fit_within(
            input,
            Size {
                w: max_side,
                h: max_side,
            },
        ),
    };
    ScalePlan {
        input,
        target,
        out: Size { w, h },
    }
}

/// Fit image within a bounding box while preserving aspect ratio.
/// Returns the input unchanged when it already fits.
fn fit_within(input: Size, bounds: Size) -> (u32, u32) {
    if input.w <= bounds.w && input.h <= bounds.h {
        return (input.w, input.h);
    }
    let (w, h) = (input.w as f64, input.h as f64);
    let (bw, bh) = (bounds.w as f64, bounds.h as f64);
    let s = (bw / w).min(bh / h).min(1.0); // don't upscale
    (
        ((w * s).round() as u32).clamp(1, bounds.w.max(1)),
        ((h * s).round() as u32).clamp(1, bounds.h.max(1)),
    )
}

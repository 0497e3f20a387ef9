// SPDX-License-Identifier: MIT
// CPU scaler built on fast_image_resize (SIMD-accelerated).
// RGB8 in → RGB8 out, direct write into caller-provided dst buffer.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x3;
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};

use crate::plan::{ResizeFilter, ScalePlan};

#[derive(Debug)]
pub enum ScaleError {
    BufferTooSmall,
    SourceSizeMismatch { expected: usize, actual: usize },
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferTooSmall => write!(f, "Output buffer too small"),
            ScaleError::SourceSizeMismatch { expected, actual } => {
                write!(f, "Source buffer is {} bytes, expected {}", actual, expected)
            }
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

impl ResizeFilter {
    fn to_alg(self) -> ResizeAlg {
        match self {
            ResizeFilter::Lanczos3 => ResizeAlg::Convolution(FilterType::Lanczos3),
            ResizeFilter::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
            ResizeFilter::Nearest => ResizeAlg::Nearest,
        }
    }
}

/// Scale a tightly packed RGB8 buffer according to `plan`.
/// `dst` must be at least `plan.output_len()` bytes.
pub fn scale_rgb_cpu(
    resizer: &mut Resizer,
    src_rgb: &[u8],
    plan: &ScalePlan,
    filter: ResizeFilter,
    dst: &mut [u8],
) -> Result<(), ScaleError> {
    let src_len = (plan.input.w as usize) * (plan.input.h as usize) * 3;
    if src_rgb.len() != src_len {
        return Err(ScaleError::SourceSizeMismatch {
            expected: src_len,
            actual: src_rgb.len(),
        });
    }
    let dst_len = plan.output_len();
    if dst.len() < dst_len {
        return Err(ScaleError::BufferTooSmall);
    }

    if plan.is_identity() {
        dst[..dst_len].copy_from_slice(src_rgb);
        return Ok(());
    }

    let src_view = TypedImageRef::<U8x3>::from_buffer(plan.input.w, plan.input.h, src_rgb)?;
    let mut dst_image = TypedImage::<U8x3>::from_buffer(plan.out.w, plan.out.h, &mut dst[..dst_len])?;

    let opts = ResizeOptions::new().resize_alg(filter.to_alg());
    resizer.resize_typed::<U8x3>(&src_view, &mut dst_image, &opts)?;

    Ok(())
}

// SPDX-License-Identifier: MIT
//! # vgate-scale: Provider-Safe Image Scaling
//!
//! Resize planning and CPU scaling used by the vision gateway's preprocessor.
//! Vision providers reject or silently downsample oversized images, and every
//! extra pixel is billed as input tokens, so images are clamped to a bounding
//! box before they are hashed and sent.
//!
//! ## Key Components
//!
//! - [`plan`]: Scaling plan computation (aspect-preserving, never upscales)
//! - [`cpu`]: RGB8 scaling built on fast_image_resize (SIMD-accelerated)
//!
//! ## Usage Example
//!
//! ```rust
//! use vgate_scale::cpu::scale_rgb_cpu;
//! use vgate_scale::plan::{build_plan, ResizeFilter, ScaleTarget, Size};
//!
//! let input = Size { w: 4096, h: 1024 };
//! let plan = build_plan(input, ScaleTarget::Within(Size { w: 2048, h: 2048 }));
//! assert_eq!((plan.out.w, plan.out.h), (2048, 512));
//!
//! let src = vec![0u8; (input.w * input.h * 3) as usize];
//! let mut dst = vec![0u8; plan.output_len()];
//! let mut resizer = fast_image_resize::Resizer::new();
//! scale_rgb_cpu(&mut resizer, &src, &plan, ResizeFilter::Lanczos3, &mut dst).unwrap();
//! ```

pub mod cpu;
pub mod plan;

//! # Preprocessor
//!
//! Normalizes arbitrary screenshots into a provider-safe, cache-stable form:
//!
//! 1. Decode (any format the `image` crate reads)
//! 2. Clamp into the configured bounding box, preserving aspect ratio
//! 3. Re-encode at a fixed format and quality
//! 4. Hash the final bytes (SHA-256)
//!
//! The hash is taken after re-encoding, so two inputs that normalize to the
//! same bytes share a hash even if one arrived as PNG and the other as BMP.
//!
//! JPEG output carries a small COM segment naming the quality it was encoded
//! at. Input already carrying the marker for the current quality, and already
//! inside the bounding box, is passed through untouched; this keeps
//! normalization idempotent despite JPEG being lossy.

use base64::{Engine as _, engine::general_purpose};
use fast_image_resize::Resizer;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};
use sha2::{Digest, Sha256};
use vgate_scale::cpu::scale_rgb_cpu;
use vgate_scale::plan::{ScaleTarget, Size, build_plan};

use crate::config::PreprocessConfig;
use crate::error::GatewayError;
use crate::model::{ImageFormat, NormalizedImage};

const COM_MARKER: [u8; 2] = [0xFF, 0xFE];
const SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_PREFIX: &str = "vision-gateway normalized q=";

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Stateless image normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Normalize one image. `label` names it in errors (`baseline`, `current`, `diff`).
    pub fn normalize_labeled(
        &self,
        label: &str,
        bytes: &[u8],
    ) -> Result<NormalizedImage, GatewayError> {
        if bytes.is_empty() {
            return Err(GatewayError::preprocessing(label, "zero-byte input")
                .with_recovery_suggestion("Check that the screenshot was written before analysis"));
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| GatewayError::preprocessing(label, format!("undecodable image: {}", e)))?;
        check_color_type(label, decoded.color())?;

        let (width, height) = (decoded.width(), decoded.height());
        let plan = build_plan(
            Size {
                w: width,
                h: height,
            },
            ScaleTarget::Within(Size {
                w: self.config.max_width,
                h: self.config.max_height,
            }),
        );

        if plan.is_identity() && self.is_already_normalized(bytes) {
            log::debug!("{} already normalized, passing through", label);
            return Ok(self.finish(bytes.to_vec(), bytes.len(), width, height));
        }

        let rgb = self.resize(label, decoded, &plan)?;
        let (out_w, out_h) = rgb.dimensions();
        let encoded = self.encode(label, &rgb)?;
        let normalized = self.finish(encoded, bytes.len(), out_w, out_h);
        log::debug!(
            "normalized {} {}x{} -> {}x{} ({} -> {} bytes, ratio {:.2})",
            label,
            width,
            height,
            out_w,
            out_h,
            normalized.original_size,
            normalized.processed_size,
            normalized.compression_ratio()
        );
        Ok(normalized)
    }

    /// Normalize one image with a generic label.
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, GatewayError> {
        self.normalize_labeled("input", bytes)
    }

    fn resize(
        &self,
        label: &str,
        decoded: DynamicImage,
        plan: &vgate_scale::plan::ScalePlan,
    ) -> Result<RgbImage, GatewayError> {
        let rgb = decoded.into_rgb8();
        if plan.is_identity() {
            return Ok(rgb);
        }
        let mut out = vec![0u8; plan.output_len()];
        scale_rgb_cpu(
            &mut Resizer::new(),
            rgb.as_raw(),
            plan,
            self.config.filter,
            &mut out,
        )
        .map_err(|e| GatewayError::preprocessing(label, format!("resize failed: {}", e)))?;
        RgbImage::from_raw(plan.out.w, plan.out.h, out)
            .ok_or_else(|| GatewayError::preprocessing(label, "resized buffer has wrong length"))
    }

    fn encode(&self, label: &str, rgb: &RgbImage) -> Result<Vec<u8>, GatewayError> {
        let (w, h) = rgb.dimensions();
        let mut out = Vec::new();
        let written = match self.config.format {
            ImageFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut out, self.config.quality)
                    .encode(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
            }
            ImageFormat::Png => PngEncoder::new(&mut out).write_image(
                rgb.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            ),
        };
        written.map_err(|e| GatewayError::preprocessing(label, format!("encode failed: {}", e)))?;

        if self.config.format == ImageFormat::Jpeg {
            out = insert_marker(out, &self.marker_payload());
        }
        Ok(out)
    }

    fn finish(&self, bytes: Vec<u8>, original_size: usize, width: u32, height: u32) -> NormalizedImage {
        NormalizedImage {
            base64: general_purpose::STANDARD.encode(&bytes),
            hash: content_hash(&bytes),
            format: self.config.format,
            width,
            height,
            original_size,
            processed_size: bytes.len(),
            bytes,
        }
    }

    fn marker_payload(&self) -> String {
        format!("{}{}", MARKER_PREFIX, self.config.quality)
    }

    /// PNG output is deterministic, so only JPEG needs the marker check.
    fn is_already_normalized(&self, bytes: &[u8]) -> bool {
        match self.config.format {
            ImageFormat::Jpeg => read_marker(bytes).as_deref() == Some(self.marker_payload().as_str()),
            ImageFormat::Png => false,
        }
    }
}

/// The decoders already expand palette, low bit depth and CMYK input
/// (JPEG Adobe CMYK included) into one of the layouts below, and every
/// one of them converts to RGB8. The fallback arm catches layouts added by
/// later `image` releases, since `ColorType` is non-exhaustive.
fn check_color_type(label: &str, color: ColorType) -> Result<(), GatewayError> {
    match color {
        ColorType::L8
        | ColorType::La8
        | ColorType::Rgb8
        | ColorType::Rgba8
        | ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16
        | ColorType::Rgb32F
        | ColorType::Rgba32F => Ok(()),
        other => Err(GatewayError::preprocessing(
            label,
            format!("unsupported color type {:?}", other),
        )),
    }
}

/// Insert a COM segment directly after SOI.
fn insert_marker(jpeg: Vec<u8>, payload: &str) -> Vec<u8> {
    if !jpeg.starts_with(&SOI) {
        return jpeg;
    }
    let len = (payload.len() + 2) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&SOI);
    out.extend_from_slice(&COM_MARKER);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(&jpeg[2..]);
    out
}

fn read_marker(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 6 || !bytes.starts_with(&SOI) || bytes[2..4] != COM_MARKER {
        return None;
    }
    let len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    let payload = bytes.get(6..4 + len)?;
    let text = std::str::from_utf8(payload).ok()?;
    text.starts_with(MARKER_PREFIX).then(|| text.to_string())
}

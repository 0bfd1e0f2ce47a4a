//! Fit an input image into the size/quality envelope a vision API expects.
//!
//! The fast path hands the caller's bytes through untouched when no resize,
//! colour conversion, or explicit quality was requested.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::OcrError;
use super::types::{FrameGeometry, ImageFrame};

/// Default longest-edge cap in pixels.
pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 1536;

/// JPEG re-encode quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    #[default]
    Auto,
    High,
    Medium,
    Low,
}

impl QualityMode {
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            QualityMode::High => 95,
            QualityMode::Medium | QualityMode::Auto => 85,
            QualityMode::Low => 75,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(QualityMode::Auto),
            "high" => Some(QualityMode::High),
            "medium" => Some(QualityMode::Medium),
            "low" => Some(QualityMode::Low),
            _ => None,
        }
    }
}

/// Preprocessing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub max_size: u32,
    pub quality: QualityMode,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_IMAGE_SIZE,
            quality: QualityMode::Auto,
        }
    }
}

/// Build the per-request frame for `bytes`.
///
/// Never fails: an undecodable image is passed through with unknown size and
/// `scale_ratio = 1.0`.
pub fn prepare_frame(bytes: Vec<u8>, options: &PreprocessOptions) -> ImageFrame {
    let format = image::guess_format(&bytes).ok();
    let decoded = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Image decode failed, sending original bytes: {}", e);
            return ImageFrame {
                original: bytes,
                processed: None,
                mime_type: mime_for(format),
                geometry: FrameGeometry::unknown(),
            };
        }
    };

    let original_size = (decoded.width(), decoded.height());
    match reencode(&decoded, options) {
        Ok(None) => ImageFrame {
            original: bytes,
            processed: None,
            mime_type: mime_for(format),
            geometry: FrameGeometry::identity(original_size),
        },
        Ok(Some((processed, processed_size, scale_ratio))) => {
            debug!(
                "Preprocessed image {}x{} -> {}x{} (ratio {:.4})",
                original_size.0, original_size.1, processed_size.0, processed_size.1, scale_ratio
            );
            ImageFrame {
                original: bytes,
                processed: Some(processed),
                mime_type: "image/jpeg",
                geometry: FrameGeometry {
                    original_size: Some(original_size),
                    processed_size: Some(processed_size),
                    scale_ratio,
                },
            }
        }
        Err(e) => {
            warn!("Image re-encode failed, sending original bytes: {}", e);
            ImageFrame {
                original: bytes,
                processed: None,
                mime_type: mime_for(format),
                geometry: FrameGeometry::identity(original_size),
            }
        }
    }
}

/// Returns `None` on the fast path, else (bytes, processed size, scale ratio).
fn reencode(
    image: &DynamicImage,
    options: &PreprocessOptions,
) -> Result<Option<(Vec<u8>, (u32, u32), f64)>, OcrError> {
    let (width, height) = (image.width(), image.height());
    let longest = width.max(height);

    let need_resize = options.max_size > 0 && longest > options.max_size;
    let need_convert = image.color() != ColorType::Rgb8;
    let need_quality = options.quality != QualityMode::Auto;

    if !(need_resize || need_convert || need_quality) {
        return Ok(None);
    }

    let mut rgb = image.to_rgb8();
    let mut scale_ratio = 1.0;
    if need_resize {
        scale_ratio = options.max_size as f64 / longest as f64;
        let new_width = ((width as f64 * scale_ratio) as u32).max(1);
        let new_height = ((height as f64 * scale_ratio) as u32).max(1);
        rgb = image::imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3);
    }

    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, options.quality.jpeg_quality());
    encoder.encode_image(&rgb)?;

    Ok(Some((
        buffer.into_inner(),
        (rgb.width(), rgb.height()),
        scale_ratio,
    )))
}

fn mime_for(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::WebP) => "image/webp",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::Bmp) => "image/bmp",
        _ => "image/jpeg",
    }
}

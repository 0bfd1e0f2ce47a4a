//! Cut a detected line out of the original image.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use crate::ocr::{OcrError, Quad};

/// JPEG quality for crops; they are small, so quality is cheap.
const CROP_QUALITY: u8 = 92;

/// Crop the bounding rectangle of `quad`, grown by `padding` on every side
/// and clipped to the image, and encode it as JPEG.
pub fn crop_region(image: &RgbImage, quad: &Quad, padding: u32) -> Result<Vec<u8>, OcrError> {
    let (min_x, min_y, max_x, max_y) = quad.bounds();
    let pad = padding as i64;

    let x1 = (min_x as i64 - pad).clamp(0, image.width() as i64) as u32;
    let y1 = (min_y as i64 - pad).clamp(0, image.height() as i64) as u32;
    let x2 = (max_x as i64 + pad).clamp(0, image.width() as i64) as u32;
    let y2 = (max_y as i64 + pad).clamp(0, image.height() as i64) as u32;

    if x2 <= x1 || y2 <= y1 {
        return Err(OcrError::Image(format!(
            "Invalid crop region: ({x1}, {y1}) to ({x2}, {y2})"
        )));
    }

    let cropped = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, CROP_QUALITY).encode_image(&cropped)?;
    Ok(buffer.into_inner())
}

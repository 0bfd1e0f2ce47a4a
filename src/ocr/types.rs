//! Canonical data model shared by every pipeline stage.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::error::OcrError;

/// Result code for a non-empty region list.
pub const CODE_SUCCESS: u16 = 100;
/// Result code for "no text found".
pub const CODE_EMPTY: u16 = 101;
/// Result code for a failure; `data` carries the message.
pub const CODE_ERROR: u16 = 102;

/// Frame size assumed when the original size is unknown (decode failure).
pub const DEFAULT_FRAME_SIZE: (u32, u32) = (800, 600);

/// Scale bookkeeping for one recognition call.
///
/// `scale_ratio` is processed / original (linear, at most 1.0). A box coming
/// back from a backend is divided by it exactly once to land in original space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub original_size: Option<(u32, u32)>,
    pub processed_size: Option<(u32, u32)>,
    pub scale_ratio: f64,
}

impl FrameGeometry {
    /// Geometry of an image that was not rescaled.
    pub fn identity(size: (u32, u32)) -> Self {
        Self {
            original_size: Some(size),
            processed_size: Some(size),
            scale_ratio: 1.0,
        }
    }

    /// Geometry after a failed decode: nothing is known.
    pub fn unknown() -> Self {
        Self {
            original_size: None,
            processed_size: None,
            scale_ratio: 1.0,
        }
    }

    /// Size that backend coordinates are expressed in.
    pub fn reference_size(&self) -> (f64, f64) {
        if let Some((w, h)) = self.processed_size {
            return (w as f64, h as f64);
        }
        if let Some((w, h)) = self.original_size {
            return (w as f64 * self.scale_ratio, h as f64 * self.scale_ratio);
        }
        (DEFAULT_FRAME_SIZE.0 as f64, DEFAULT_FRAME_SIZE.1 as f64)
    }

    /// Size of the output coordinate space, falling back to the pipeline default.
    pub fn output_size(&self) -> (u32, u32) {
        self.original_size.unwrap_or(DEFAULT_FRAME_SIZE)
    }

    /// Project a processed-space coordinate into original space.
    pub fn to_original(&self, v: f64) -> f64 {
        if self.scale_ratio > 0.0 {
            v / self.scale_ratio
        } else {
            v
        }
    }

    /// Project an original-space coordinate into processed space.
    pub fn to_processed(&self, v: f64) -> f64 {
        v * self.scale_ratio
    }
}

/// Per-request image context.
///
/// Created once per recognition call and threaded through every stage; never
/// stored on the long-lived engine.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Bytes exactly as supplied by the caller.
    pub original: Vec<u8>,
    /// Re-encoded bytes, `None` when preprocessing took the fast path.
    pub processed: Option<Vec<u8>>,
    pub mime_type: &'static str,
    pub geometry: FrameGeometry,
}

impl ImageFrame {
    /// Bytes to send to a remote recognizer.
    pub fn processed_bytes(&self) -> &[u8] {
        self.processed.as_deref().unwrap_or(&self.original)
    }

    pub fn scale_ratio(&self) -> f64 {
        self.geometry.scale_ratio
    }
}

/// Four integer points, clockwise from top-left, in original-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quad(pub [[i32; 2]; 4]);

impl Quad {
    /// Axis-aligned rectangle from its corners.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Quad([[left, top], [right, top], [right, bottom], [left, bottom]])
    }

    /// (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let xs = self.0.iter().map(|p| p[0]);
        let ys = self.0.iter().map(|p| p[1]);
        (
            xs.clone().min().unwrap_or(0),
            ys.clone().min().unwrap_or(0),
            xs.max().unwrap_or(0),
            ys.max().unwrap_or(0),
        )
    }

    pub fn center_y(&self) -> f64 {
        self.0.iter().map(|p| p[1] as f64).sum::<f64>() / 4.0
    }

    pub fn center_x(&self) -> f64 {
        self.0.iter().map(|p| p[0] as f64).sum::<f64>() / 4.0
    }

    /// Polygon area (shoelace).
    pub fn area(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..4 {
            let [x1, y1] = self.0[i];
            let [x2, y2] = self.0[(i + 1) % 4];
            sum += (x1 as f64) * (y2 as f64) - (x2 as f64) * (y1 as f64);
        }
        (sum / 2.0).abs()
    }
}

/// One recognized text region; the canonical output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedRegion {
    pub text: String,
    #[serde(rename = "box")]
    pub bbox: Quad,
    pub score: f32,
}

impl RecognizedRegion {
    pub fn new(text: impl Into<String>, bbox: Quad, score: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            score: clamp_score(score),
        }
    }
}

/// Clamp a backend score into [0, 1]; NaN becomes 1.0 like a missing score.
pub fn clamp_score(score: f64) -> f32 {
    if score.is_nan() {
        1.0
    } else {
        score.clamp(0.0, 1.0) as f32
    }
}

/// Outward-facing result of one recognition call.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrResult {
    Success(Vec<RecognizedRegion>),
    Empty,
    /// Human-readable message, without the `[Error]` prefix.
    Error(String),
}

impl OcrResult {
    /// `Success` for a non-empty list, `Empty` otherwise.
    pub fn from_regions(regions: Vec<RecognizedRegion>) -> Self {
        if regions.is_empty() {
            OcrResult::Empty
        } else {
            OcrResult::Success(regions)
        }
    }

    pub fn from_error(err: &OcrError) -> Self {
        OcrResult::Error(err.to_string())
    }

    pub fn code(&self) -> u16 {
        match self {
            OcrResult::Success(_) => CODE_SUCCESS,
            OcrResult::Empty => CODE_EMPTY,
            OcrResult::Error(_) => CODE_ERROR,
        }
    }

    pub fn regions(&self) -> &[RecognizedRegion] {
        match self {
            OcrResult::Success(regions) => regions,
            _ => &[],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OcrResult::Success(_))
    }
}

impl Serialize for OcrResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OcrResult", 2)?;
        state.serialize_field("code", &self.code())?;
        match self {
            OcrResult::Success(regions) => state.serialize_field("data", regions)?,
            OcrResult::Empty => state.serialize_field("data", "")?,
            OcrResult::Error(message) => {
                state.serialize_field("data", &format!("[Error] {}", message))?
            }
        }
        state.end()
    }
}

/// Raw item reported by the local detector; the box is not canonical yet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionItem {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "box", alias = "bbox")]
    pub raw_box: serde_json::Value,
    #[serde(default = "default_score")]
    pub score: f64,
}

fn default_score() -> f64 {
    1.0
}

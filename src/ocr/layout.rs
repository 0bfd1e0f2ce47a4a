//! Estimated boxes for replies that carry text but no coordinates.

use serde::{Deserialize, Serialize};

use super::types::{FrameGeometry, Quad, RecognizedRegion};

const CHAR_WIDTH: i32 = 12;
const MAX_LINE_HEIGHT: i32 = 30;
const MARGIN: f64 = 0.05;
const MAX_WIDTH: f64 = 0.9;
const LINE_ADVANCE: f64 = 1.2;

/// How text-only content is split into regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLayout {
    /// One region per non-empty line.
    #[default]
    Lines,
    /// The whole content as one region, Markdown and line breaks intact.
    Block,
}

impl TextLayout {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lines" | "line" => Some(TextLayout::Lines),
            "block" | "markdown" => Some(TextLayout::Block),
            _ => None,
        }
    }
}

/// Deterministic top-to-bottom placement inside the original image.
#[derive(Debug, Clone, Copy)]
pub struct EstimatedLayout {
    width: i32,
    height: i32,
    line_height: i32,
    left: i32,
    top: i32,
    max_width: i32,
}

impl EstimatedLayout {
    pub fn new(geometry: &FrameGeometry, line_count: usize) -> Self {
        let (w, h) = geometry.output_size();
        let (width, height) = (w as i32, h as i32);
        let line_height = MAX_LINE_HEIGHT.min(height / line_count.max(1) as i32).max(1);
        Self {
            width,
            height,
            line_height,
            left: (width as f64 * MARGIN) as i32,
            top: (height as f64 * MARGIN) as i32,
            max_width: (width as f64 * MAX_WIDTH) as i32,
        }
    }

    /// Box for the `index`-th line of `chars` characters spanning `rows` rows.
    pub fn line_box(&self, index: usize, chars: usize, rows: usize) -> Quad {
        let advance = (self.line_height as f64 * LINE_ADVANCE) as i32;
        let y = self.top + advance * index as i32;
        let text_width = (chars as i32).saturating_mul(CHAR_WIDTH).min(self.max_width);
        let bottom = y + self.line_height * rows.max(1) as i32;

        let clamp_x = |v: i32| v.clamp(0, self.width);
        let clamp_y = |v: i32| v.clamp(0, self.height);
        Quad::from_corners(
            clamp_x(self.left),
            clamp_y(y),
            clamp_x(self.left + text_width),
            clamp_y(bottom),
        )
    }
}

/// Split `content` per `layout` and give every unit an estimated box.
pub fn estimate_regions(
    content: &str,
    layout: TextLayout,
    geometry: &FrameGeometry,
) -> Vec<RecognizedRegion> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return Vec::new();
    }

    match layout {
        TextLayout::Lines => {
            let layout = EstimatedLayout::new(geometry, lines.len());
            lines
                .iter()
                .enumerate()
                .map(|(i, line)| {
                    RecognizedRegion::new(*line, layout.line_box(i, line.chars().count(), 1), 1.0)
                })
                .collect()
        }
        TextLayout::Block => {
            let layout = EstimatedLayout::new(geometry, lines.len());
            let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
            let bbox = layout.line_box(0, widest, lines.len());
            vec![RecognizedRegion::new(content.trim(), bbox, 1.0)]
        }
    }
}

//! Turn a vendor reply into an [`OcrResult`].
//!
//! Coordinate replies are searched for JSON (whole string, fenced block, first
//! balanced object), then for `[x1,y1,x2,y2] text` lines. Anything that cannot
//! be read as coordinates is treated as plain text with estimated boxes.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::content::{text_of, Content};
use super::coords::{CoordinateMapper, MappedBox};
use super::layout::{estimate_regions, EstimatedLayout, TextLayout};
use super::prompt::{OutputFormat, NO_TEXT_SENTINEL};
use super::types::{FrameGeometry, OcrResult, RecognizedRegion};

const BOX_KEYS: [&str; 6] = ["box", "box_2d", "bbox", "rect", "points", "polygon"];

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("valid fence regex")
});

static BRACKET_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let n = r"\s*(-?\d+(?:\.\d+)?)\s*";
    Regex::new(&format!(r"^\[{n},{n},{n},{n}\]\s*(.*)$")).expect("valid bracket regex")
});

/// Stateless reply normalizer; geometry comes with each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseNormalizer {
    format: OutputFormat,
    layout: TextLayout,
}

impl ResponseNormalizer {
    pub fn new(format: OutputFormat, layout: TextLayout) -> Self {
        Self { format, layout }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Normalize reply content of any shape.
    pub fn normalize(&self, content: &Value, geometry: &FrameGeometry) -> OcrResult {
        if self.format == OutputFormat::WithCoordinates {
            if let Content::Structured(value) = Content::classify(content) {
                if let Some(regions) = coordinate_regions(&value, geometry) {
                    return OcrResult::from_regions(regions);
                }
            }
        }
        self.normalize_text(&text_of(content), geometry)
    }

    /// Normalize reply text.
    pub fn normalize_text(&self, content: &str, geometry: &FrameGeometry) -> OcrResult {
        let content = content.trim();
        if content.is_empty() || is_no_text(content) {
            return OcrResult::Empty;
        }

        if self.format == OutputFormat::WithCoordinates {
            match extract_json(content) {
                Some(value) => {
                    if let Some(regions) = coordinate_regions(&value, geometry) {
                        return OcrResult::from_regions(regions);
                    }
                    debug!("Reply JSON has no texts array, treating as plain text");
                }
                None => debug!("No JSON in coordinate reply, trying bracketed lines"),
            }

            if let Some(regions) = bracketed_regions(content, geometry) {
                return OcrResult::from_regions(regions);
            }
            warn!("Coordinate reply could not be parsed, falling back to text-only");
        }

        OcrResult::from_regions(estimate_regions(strip_fence(content), self.layout, geometry))
    }
}

/// Whether `content` is the "no text" sentinel reply.
pub fn is_no_text(content: &str) -> bool {
    let content = content.trim();
    let sentinel = NO_TEXT_SENTINEL.trim_end_matches('.');
    content.trim_end_matches('.').eq_ignore_ascii_case(sentinel)
}

/// Unwrap content that is entirely one fenced block.
fn strip_fence(content: &str) -> &str {
    match FENCE_RE.captures(content) {
        Some(caps) if caps.get(0).map(|m| m.as_str().len()) == Some(content.len()) => {
            caps.get(1).map(|m| m.as_str().trim()).unwrap_or(content)
        }
        _ => content,
    }
}

/// Find a JSON object or array in free-form text.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    for caps in FENCE_RE.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                if value.is_object() || value.is_array() {
                    return Some(value);
                }
            }
        }
    }

    let balanced = first_balanced_object(trimmed)?;
    serde_json::from_str(balanced).ok()
}

/// First `{...}` substring with balanced braces, ignoring braces inside strings.
fn first_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate the entry list: a bare array, or `texts` at the top level or under `data`/`result`.
fn texts_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("texts") {
                return Some(items);
            }
            ["data", "result"]
                .iter()
                .find_map(|k| map.get(*k).and_then(texts_array))
        }
        _ => None,
    }
}

/// Regions from a parsed coordinate reply; `None` if it has no entry list.
pub fn coordinate_regions(value: &Value, geometry: &FrameGeometry) -> Option<Vec<RecognizedRegion>> {
    let entries = texts_array(value)?;
    let mapper = CoordinateMapper::new(*geometry);
    let layout = EstimatedLayout::new(geometry, entries.len());

    let mut regions = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let text = match entry {
            Value::Object(map) => map.get("text").map(text_of).unwrap_or_default(),
            other => text_of(other),
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let mapped = entry.as_object().and_then(|map| {
            BOX_KEYS.iter().find_map(|key| {
                map.get(*key).map(|raw| match *key {
                    "box_2d" => mapper.map(&box_2d_corners(raw)),
                    _ => mapper.map(raw),
                })
            })
        });
        let bbox = match mapped {
            Some(MappedBox::Mapped(quad)) => quad,
            _ => layout.line_box(index, text.chars().count(), 1),
        };

        let score = entry
            .get("score")
            .or_else(|| entry.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        regions.push(RecognizedRegion::new(text, bbox, score));
    }
    Some(regions)
}

/// `box_2d` is `[ymin, xmin, ymax, xmax]` on a 0..1000 grid; rewrite it as
/// normalized corners so the mapper scales it by the processed size.
fn box_2d_corners(raw: &Value) -> Value {
    let nums: Option<Vec<f64>> = raw
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_f64).collect());
    match nums {
        Some(n) if n.len() == 4 && n.iter().any(|v| *v > 1.0) => json!({
            "x1": n[1] / 1000.0,
            "y1": n[0] / 1000.0,
            "x2": n[3] / 1000.0,
            "y2": n[2] / 1000.0,
        }),
        _ => raw.clone(),
    }
}

/// `[x1,y1,x2,y2] text` lines. `None` unless at least one line matches.
fn bracketed_regions(content: &str, geometry: &FrameGeometry) -> Option<Vec<RecognizedRegion>> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let mapper = CoordinateMapper::new(*geometry);
    let layout = EstimatedLayout::new(geometry, lines.len());

    let mut matched = false;
    let mut regions = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let explicit = BRACKET_LINE_RE.captures(line).and_then(|caps| {
            let coord = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
            let corners = json!({
                "x1": coord(1)?, "y1": coord(2)?, "x2": coord(3)?, "y2": coord(4)?,
            });
            let text = caps.get(5).map(|m| m.as_str().trim().to_string())?;
            Some((mapper.map(&corners).quad()?, text))
        });

        match explicit {
            Some((quad, text)) => {
                matched = true;
                if !text.is_empty() {
                    regions.push(RecognizedRegion::new(text, quad, 1.0));
                }
            }
            None => {
                let bbox = layout.line_box(index, line.chars().count(), 1);
                regions.push(RecognizedRegion::new(*line, bbox, 1.0));
            }
        }
    }

    matched.then_some(regions)
}

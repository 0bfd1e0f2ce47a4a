//! Recovery strategies and the helpers that line remote text up with local boxes.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::ocr::content::text_of;
use crate::ocr::normalize::extract_json;
use crate::ocr::RecognizedRegion;

/// One step of the recovery chain entered when batch correction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Whole image, coordinate reply, matched to local boxes by vertical order.
    WholeImageCoordinates,
    /// Whole image, plain text, matched line by line.
    WholeImageText,
    /// One remote call per cropped box.
    PerBoxCrop,
    /// Local detector output verbatim.
    RawLocal,
}

/// Tried in order; the first strategy yielding a non-empty region list wins.
pub const FALLBACK_CHAIN: [FallbackStrategy; 4] = [
    FallbackStrategy::WholeImageCoordinates,
    FallbackStrategy::WholeImageText,
    FallbackStrategy::PerBoxCrop,
    FallbackStrategy::RawLocal,
];

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::WholeImageCoordinates => "whole-image coordinates",
            FallbackStrategy::WholeImageText => "whole-image text",
            FallbackStrategy::PerBoxCrop => "per-box crop",
            FallbackStrategy::RawLocal => "raw local",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)(?:[.)]\s+|、\s*)(.*)$").expect("valid numbering regex"));

static BOX_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\s*-?\d+(?:\.\d+)?(?:\s*,\s*-?\d+(?:\.\d+)?){3}\s*\]\s*(.*)$").expect("valid box prefix regex")
});

/// Corrected lines from a batch-correction reply.
///
/// Accepts a JSON array of strings, `{"lines": [...]}` / `{"texts": [...]}`,
/// or plain lines. Plain lines lose a `1.` / `1)` / `1、` prefix only when
/// every line is numbered in sequence, and a leading `[x1,y1,x2,y2]` only
/// when it holds exactly four numbers.
pub fn parse_correction_lines(reply: &str) -> Vec<String> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Vec::new();
    }

    if let Some(value) = extract_json(reply) {
        let items = match &value {
            Value::Array(items) => Some(items),
            Value::Object(map) => ["lines", "texts", "data", "result"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array)),
            _ => None,
        };
        if let Some(items) = items {
            return items.iter().map(|v| text_of(v).trim().to_string()).collect();
        }
    }

    let lines: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect();

    let numbered: Option<Vec<&str>> = lines
        .iter()
        .copied()
        .enumerate()
        .map(|(i, line)| {
            let caps = NUMBERED_RE.captures(line)?;
            let n: usize = caps[1].parse().ok()?;
            (n == i + 1).then(|| caps.get(2).map_or("", |m| m.as_str()))
        })
        .collect();

    numbered
        .unwrap_or(lines)
        .into_iter()
        .map(|line| match BOX_PREFIX_RE.captures(line) {
            Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
            None => line.trim().to_string(),
        })
        .collect()
}

/// Assign remote regions to local boxes (given by vertical centers, in order).
///
/// Equal counts pair up after sorting both sides top to bottom; otherwise each
/// local box takes the nearest not-yet-used remote region.
pub fn match_by_vertical_order(local_centers: &[f64], remote: &[RecognizedRegion]) -> Vec<Option<String>> {
    let mut remote_sorted: Vec<&RecognizedRegion> = remote.iter().collect();
    remote_sorted.sort_by(|a, b| a.bbox.center_y().total_cmp(&b.bbox.center_y()));

    if remote_sorted.len() == local_centers.len() {
        let mut local_order: Vec<usize> = (0..local_centers.len()).collect();
        local_order.sort_by(|&a, &b| local_centers[a].total_cmp(&local_centers[b]));
        let mut out = vec![None; local_centers.len()];
        for (slot, region) in local_order.into_iter().zip(remote_sorted) {
            out[slot] = Some(region.text.clone());
        }
        return out;
    }

    let mut used = vec![false; remote_sorted.len()];
    local_centers
        .iter()
        .map(|&cy| {
            let best = remote_sorted
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .min_by(|(_, a), (_, b)| {
                    (a.bbox.center_y() - cy)
                        .abs()
                        .total_cmp(&(b.bbox.center_y() - cy).abs())
                })
                .map(|(i, _)| i)?;
            used[best] = true;
            Some(remote_sorted[best].text.clone())
        })
        .collect()
}

/// Pair remote lines with local boxes by index.
pub fn match_by_index(local_count: usize, lines: Vec<String>) -> Vec<Option<String>> {
    let mut lines = lines.into_iter();
    (0..local_count).map(|_| lines.next()).collect()
}

//! Canonicalize backend boxes into original-image quads.
//!
//! Accepted shapes: 4-point polygons, flat `[x,y,w,h]` / `[x1,y1,x2,y2]`,
//! `{left,top,width,height}` / `{x1,y1,x2,y2}` objects, normalized floats,
//! lists of rectangles, point sets with more than four vertices, and strings
//! with the numbers embedded in them. Multi-part shapes collapse to their
//! bounding rectangle.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use super::types::{FrameGeometry, Quad};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"));

/// Outcome of mapping one raw box.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedBox {
    Mapped(Quad),
    /// No supported shape matched; the raw value is handed back untouched.
    Unrecognized(Value),
}

impl MappedBox {
    pub fn quad(&self) -> Option<Quad> {
        match self {
            MappedBox::Mapped(q) => Some(*q),
            MappedBox::Unrecognized(_) => None,
        }
    }
}

/// Piece of a parsed box before projection.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Points(Vec<[f64; 2]>),
    Rect([f64; 4]),
}

/// Maps boxes for one request's geometry. Cheap to construct per call.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    geometry: FrameGeometry,
}

impl CoordinateMapper {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Map `raw` into a clockwise quad clamped to the original image.
    pub fn map(&self, raw: &Value) -> MappedBox {
        let pieces = match self.parse(raw) {
            Some(p) if !p.is_empty() => p,
            _ => {
                warn!("Unrecognized box shape, leaving as-is: {}", raw);
                return MappedBox::Unrecognized(raw.clone());
            }
        };

        let union = pieces.len() > 1;
        let mut points: Vec<[f64; 2]> = Vec::new();
        for piece in pieces {
            match piece {
                Piece::Points(p) => points.extend(p),
                Piece::Rect([x1, y1, x2, y2]) => {
                    points.extend([[x1, y1], [x2, y1], [x2, y2], [x1, y2]])
                }
            }
        }

        let points = self.project(points);
        if union || points.len() != 4 {
            MappedBox::Mapped(bounding_quad(&points))
        } else {
            MappedBox::Mapped(ordered_quad(&points))
        }
    }

    /// Normalized scaling, then the single division by `scale_ratio`, then clamping.
    fn project(&self, mut points: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
        let normalized = points
            .iter()
            .all(|p| (0.0..=1.0).contains(&p[0]) && (0.0..=1.0).contains(&p[1]));
        if normalized {
            if let Some((w, h)) = self.geometry.processed_size {
                for p in points.iter_mut() {
                    p[0] *= w as f64;
                    p[1] *= h as f64;
                }
            }
        }

        let bounds = self.geometry.original_size;
        for p in points.iter_mut() {
            let mut x = self.geometry.to_original(p[0]).max(0.0);
            let mut y = self.geometry.to_original(p[1]).max(0.0);
            if let Some((w, h)) = bounds {
                x = x.min(w as f64);
                y = y.min(h as f64);
            }
            *p = [x, y];
        }
        points
    }

    fn parse(&self, raw: &Value) -> Option<Vec<Piece>> {
        match raw {
            Value::String(s) => {
                let nums: Vec<f64> = NUMBER_RE
                    .find_iter(s)
                    .filter_map(|m| m.as_str().parse().ok())
                    .collect();
                self.parse_flat(&nums).map(|p| vec![p])
            }
            Value::Object(map) => self.parse_object(map).map(|p| vec![p]),
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) => {
                if let Some(nums) = all_numbers(items) {
                    return self.parse_flat(&nums).map(|p| vec![p]);
                }

                // List of [x, y] pairs: polygon or point set.
                let pairs: Option<Vec<[f64; 2]>> = items
                    .iter()
                    .map(|item| match item.as_array().and_then(|a| all_numbers(a)) {
                        Some(n) if n.len() == 2 => Some([n[0], n[1]]),
                        _ => None,
                    })
                    .collect();
                if let Some(pairs) = pairs {
                    if pairs.len() < 2 {
                        return None;
                    }
                    return Some(vec![Piece::Points(pairs)]);
                }

                // Anything else is a list of boxes to union.
                let mut pieces = Vec::new();
                for item in items {
                    pieces.extend(self.parse(item)?);
                }
                Some(pieces)
            }
            _ => None,
        }
    }

    fn parse_flat(&self, nums: &[f64]) -> Option<Piece> {
        match nums.len() {
            4 => Some(Piece::Rect(self.disambiguate([
                nums[0], nums[1], nums[2], nums[3],
            ]))),
            n if n >= 6 && n % 2 == 0 => Some(Piece::Points(
                nums.chunks(2).map(|c| [c[0], c[1]]).collect(),
            )),
            _ => None,
        }
    }

    fn parse_object(&self, map: &Map<String, Value>) -> Option<Piece> {
        let get = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(number));

        if let (Some(x1), Some(y1), Some(x2), Some(y2)) = (
            get(&["x1", "xmin", "x_min"]),
            get(&["y1", "ymin", "y_min"]),
            get(&["x2", "xmax", "x_max"]),
            get(&["y2", "ymax", "y_max"]),
        ) {
            return Some(Piece::Rect([x1, y1, x2, y2]));
        }

        if let (Some(x), Some(y), Some(w), Some(h)) = (
            get(&["left", "x"]),
            get(&["top", "y"]),
            get(&["width", "w"]),
            get(&["height", "h"]),
        ) {
            return Some(Piece::Rect([x, y, x + w, y + h]));
        }

        None
    }

    /// Decide between `[x,y,w,h]` and `[x1,y1,x2,y2]` against the processed frame.
    fn disambiguate(&self, v: [f64; 4]) -> [f64; 4] {
        let (width, height) = self.geometry.reference_size();
        let [a, b, c, d] = v;
        let corners = c > width || d > height || a + c > width || b + d > height;
        if corners {
            [a, b, c, d]
        } else {
            [a, b, a + c, b + d]
        }
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn all_numbers(items: &[Value]) -> Option<Vec<f64>> {
    items.iter().map(number).collect()
}

fn bounding_quad(points: &[[f64; 2]]) -> Quad {
    let min_x = points.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
    let min_y = points.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
    let max_y = points.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);
    Quad::from_corners(
        min_x.round() as i32,
        min_y.round() as i32,
        max_x.round() as i32,
        max_y.round() as i32,
    )
}

/// Order four points clockwise (y grows downward), starting at the top-left.
fn ordered_quad(points: &[[f64; 2]]) -> Quad {
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / 4.0;

    let mut sorted: Vec<[f64; 2]> = points.to_vec();
    sorted.sort_by(|a, b| {
        let ta = (a[1] - cy).atan2(a[0] - cx);
        let tb = (b[1] - cy).atan2(b[0] - cx);
        ta.total_cmp(&tb)
    });

    let start = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a[0] + a[1]).total_cmp(&(b[0] + b[1])))
        .map(|(i, _)| i)
        .unwrap_or(0);
    sorted.rotate_left(start);

    let mut out = [[0i32; 2]; 4];
    for (slot, p) in out.iter_mut().zip(sorted.iter()) {
        *slot = [p[0].round() as i32, p[1].round() as i32];
    }
    Quad(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn geometry(processed: (u32, u32), original: (u32, u32), ratio: f64) -> FrameGeometry {
        FrameGeometry {
            original_size: Some(original),
            processed_size: Some(processed),
            scale_ratio: ratio,
        }
    }

    fn map(raw: Value, g: FrameGeometry) -> Quad {
        CoordinateMapper::new(g)
            .map(&raw)
            .quad()
            .expect("shape should be recognized")
    }

    fn within(q: &Quad, w: i32, h: i32) -> bool {
        q.0.iter().all(|p| (0..=w).contains(&p[0]) && (0..=h).contains(&p[1]))
    }

    #[test]
    fn test_xywh_scaled_into_original() {
        let g = geometry((100, 100), (200, 200), 0.5);
        assert_eq!(
            map(json!([10, 10, 50, 30]), g).0,
            [[20, 20], [120, 20], [120, 80], [20, 80]]
        );
    }

    #[test]
    fn test_xyxy_when_extent_exceeds_frame() {
        let g = FrameGeometry::identity((100, 100));
        // 60 + 70 > 100, so these are corners
        assert_eq!(
            map(json!([60, 10, 70, 40]), g).0,
            [[60, 10], [70, 10], [70, 40], [60, 40]]
        );
    }

    #[test]
    fn test_identity_polygon_unchanged() {
        let g = FrameGeometry::identity((640, 480));
        let poly = [[12, 30], [200, 32], [198, 60], [10, 58]];
        assert_eq!(map(json!(poly), g).0, poly);
    }

    #[test]
    fn test_fractional_projection_rounds_to_nearest_pixel() {
        let g = geometry((600, 600), (1000, 1000), 0.6);
        let q = map(json!([[100, 100], [200, 100], [200, 200], [100, 200]]), g);
        // 166.67 and 333.33
        assert_eq!(q.0, [[167, 167], [333, 167], [333, 333], [167, 333]]);
    }

    #[test]
    fn test_polygon_reordered_clockwise() {
        let g = FrameGeometry::identity((640, 480));
        let q = map(json!([[200, 60], [10, 10], [10, 60], [200, 10]]), g);
        assert_eq!(q.0, [[10, 10], [200, 10], [200, 60], [10, 60]]);
    }

    #[test]
    fn test_flat_eight_numbers_polygon() {
        let g = FrameGeometry::identity((640, 480));
        let q = map(json!([10, 10, 50, 10, 50, 20, 10, 20]), g);
        assert_eq!(q.0, [[10, 10], [50, 10], [50, 20], [10, 20]]);
    }

    #[test]
    fn test_normalized_floats_scaled_by_processed() {
        let g = geometry((100, 50), (200, 100), 0.5);
        let q = map(json!([[0.1, 0.2], [0.5, 0.2], [0.5, 0.4], [0.1, 0.4]]), g);
        assert_eq!(q.0, [[20, 20], [100, 20], [100, 40], [20, 40]]);
    }

    #[test]
    fn test_dict_left_top_width_height() {
        let g = FrameGeometry::identity((300, 300));
        let q = map(json!({"left": 5, "top": 6, "width": 10, "height": 4}), g);
        assert_eq!(q.0, [[5, 6], [15, 6], [15, 10], [5, 10]]);
    }

    #[test]
    fn test_dict_corners() {
        let g = FrameGeometry::identity((300, 300));
        let q = map(json!({"x1": 5, "y1": 6, "x2": 50, "y2": 40}), g);
        assert_eq!(q.0, [[5, 6], [50, 6], [50, 40], [5, 40]]);
    }

    #[test]
    fn test_multi_rect_union() {
        let g = FrameGeometry::identity((300, 300));
        let q = map(json!([[10, 10, 20, 5], [100, 40, 150, 60]]), g);
        // first is xywh (fits), second is xyxy (100+150 > 300)
        assert_eq!(q.0, [[10, 10], [150, 10], [150, 60], [10, 60]]);
    }

    #[test]
    fn test_point_set_union() {
        let g = FrameGeometry::identity((300, 300));
        let q = map(
            json!([[10, 10], [40, 5], [80, 12], [82, 30], [40, 33], [9, 28]]),
            g,
        );
        assert_eq!(q.0, [[9, 5], [82, 5], [82, 33], [9, 33]]);
    }

    #[test]
    fn test_numeric_string() {
        let g = FrameGeometry::identity((300, 300));
        let q = map(json!("[10, 20, 30, 40]"), g);
        assert_eq!(q.0, [[10, 20], [40, 20], [40, 60], [10, 60]]);
    }

    #[test]
    fn test_clamped_to_original() {
        let g = geometry((100, 100), (200, 200), 0.5);
        let q = map(json!([[-5, -5], [150, -5], [150, 150], [-5, 150]]), g);
        assert!(within(&q, 200, 200));
        assert_eq!(q.0, [[0, 0], [200, 0], [200, 200], [0, 200]]);
    }

    #[test]
    fn test_every_shape_yields_clamped_quad() {
        let g = geometry((100, 80), (400, 320), 0.25);
        let shapes = vec![
            json!([[1, 1], [99, 1], [99, 79], [1, 79]]),
            json!([10, 10, 20, 20]),
            json!([10, 10, 95, 75]),
            json!([0.1, 0.1, 0.3, 0.3]),
            json!({"left": 90, "top": 70, "width": 50, "height": 50}),
            json!([[1, 1], [5, 1], [9, 3], [9, 9], [5, 9], [1, 5]]),
            json!([[1, 1, 5, 5], [50, 50, 99, 79]]),
            json!("box: 3 4 500 600"),
        ];
        for shape in shapes {
            let q = map(shape.clone(), g);
            assert!(within(&q, 400, 320), "{} -> {:?}", shape, q);
        }
    }

    #[test]
    fn test_unrecognized_returned_unchanged() {
        let g = FrameGeometry::identity((100, 100));
        let raw = json!({"foo": "bar"});
        assert_eq!(
            CoordinateMapper::new(g).map(&raw),
            MappedBox::Unrecognized(raw.clone())
        );
        let raw = json!([1, 2, 3]);
        assert_eq!(
            CoordinateMapper::new(g).map(&raw),
            MappedBox::Unrecognized(raw.clone())
        );
    }

    #[test]
    fn test_unknown_size_clamps_only_negative() {
        let q = map(json!([[-3, 4], [900, 4], [900, 700], [-3, 700]]), FrameGeometry::unknown());
        assert_eq!(q.0, [[0, 4], [900, 4], [900, 700], [0, 700]]);
    }
}

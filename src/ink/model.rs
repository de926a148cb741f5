use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PenKind {
    #[default]
    Ballpen,
    Marker,
    Fountain,
}

impl PenKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ballpen => "BALLPEN",
            Self::Marker => "MARKER",
            Self::Fountain => "FOUNTAIN",
        }
    }

    /// Unknown names fall back to the ballpoint pen.
    pub fn from_name(name: &str) -> Self {
        [Self::Ballpen, Self::Marker, Self::Fountain]
            .into_iter()
            .find(|pen| pen.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const GRAY: Color = Color::rgba(128, 128, 128, 255);
    pub const LIGHT_BLUE: Color = Color::rgba(173, 216, 230, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Axis-aligned rectangle in page coordinates. `top` is the smaller y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_point(x: f32, y: f32) -> Self {
        Self::new(x, y, x, y)
    }

    /// Smallest rect covering every point, or `None` for an empty iterator.
    pub fn bounding<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut rect = Self::from_point(x, y);
        for (x, y) in iter {
            rect.include(x, y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    pub fn include(&mut self, x: f32, y: f32) {
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x);
        self.bottom = self.bottom.max(y);
    }

    pub fn union(self, other: Rect) -> Rect {
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn inflate(self, pad: f32) -> Rect {
        Rect {
            left: self.left - pad,
            top: self.top - pad,
            right: self.right + pad,
            bottom: self.bottom + pad,
        }
    }

    pub fn translate(self, dx: f32, dy: f32) -> Rect {
        Rect {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// Strict overlap test: rects that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub size: f32,
    pub tilt_x: i32,
    pub tilt_y: i32,
    pub timestamp_ms: i64,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    pub note_id: String,
    pub pen: PenKind,
    pub color: Color,
    pub width: f32,
    pub bounds: Rect,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_scroll_y: f32,
    pub points: Vec<StrokePoint>,
}

impl Stroke {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Sequence numbers must be contiguous and strictly increasing.
    pub fn has_contiguous_sequence(&self) -> bool {
        self.points
            .windows(2)
            .all(|pair| pair[1].sequence == pair[0].sequence + 1)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Stroke {
        let mut moved = self.clone();
        moved.bounds = self.bounds.translate(dx, dy);
        for point in &mut moved.points {
            point.x += dx;
            point.y += dy;
        }
        moved.updated_at = Utc::now();
        moved
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn stroke_with_points(id: &str, note_id: &str, points: &[(f32, f32)]) -> Stroke {
        let points: Vec<StrokePoint> = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| StrokePoint {
                x,
                y,
                pressure: 0.5,
                size: 1.0,
                tilt_x: 0,
                tilt_y: 0,
                timestamp_ms: i as i64,
                sequence: i as u32,
            })
            .collect();
        let bounds = Rect::bounding(points.iter().map(|p| (p.x, p.y))).unwrap_or_default();
        let now = Utc::now();
        Stroke {
            id: id.to_string(),
            note_id: note_id.to_string(),
            pen: PenKind::Ballpen,
            color: Color::BLACK,
            width: 2.0,
            bounds,
            created_at: now,
            updated_at: now,
            created_scroll_y: 0.0,
            points,
        }
    }

    pub fn stroke_with_n_points(id: &str, note_id: &str, n: usize) -> Stroke {
        let points: Vec<(f32, f32)> = (0..n).map(|i| (i as f32, i as f32)).collect();
        stroke_with_points(id, note_id, &points)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::stroke_with_points;
    use super::*;

    #[test]
    fn pen_names_round_trip_and_fall_back_to_ballpen() {
        assert_eq!(PenKind::from_name("marker"), PenKind::Marker);
        assert_eq!(PenKind::from_name("FOUNTAIN"), PenKind::Fountain);
        assert_eq!(PenKind::from_name("quill"), PenKind::Ballpen);
    }

    #[test]
    fn rects_sharing_an_edge_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 20.0, 10.0);
        let c = Rect::new(9.0, 9.0, 20.0, 20.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
    }

    #[test]
    fn translated_stroke_moves_points_and_bounds() {
        let stroke = stroke_with_points("s", "n", &[(0.0, 0.0), (10.0, 5.0)]);
        let moved = stroke.translated(3.0, -2.0);
        assert_eq!(moved.bounds, Rect::new(3.0, -2.0, 13.0, 3.0));
        assert_eq!((moved.points[1].x, moved.points[1].y), (13.0, 3.0));
        assert!(moved.has_contiguous_sequence());
    }
}

use crate::ink::model::{Rect, Stroke, StrokePoint};

pub const DEFAULT_ERASE_RADIUS: f32 = 15.0;
pub const DEFAULT_DIRTY_PADDING: f32 = 20.0;

/// Evenly spread subset of a stroke's points used for hit testing.
pub fn sample_points(points: &[StrokePoint]) -> Vec<&StrokePoint> {
    let total = points.len();
    let wanted = match total {
        0..=9 => total,
        10..=49 => total / 3,
        50..=199 => total / 10,
        _ => 20,
    }
    .max(3);
    if wanted >= total {
        return points.iter().collect();
    }
    let step = (total - 1) as f32 / (wanted - 1) as f32;
    (0..wanted)
        .map(|i| &points[((i as f32 * step).round() as usize).min(total - 1)])
        .collect()
}

/// Strokes touched by an erase path given in page coordinates.
pub fn find_strokes_to_erase<'a>(
    strokes: &'a [Stroke],
    path: &[(f32, f32)],
    radius: f32,
) -> Vec<&'a Stroke> {
    let Some(path_bounds) = Rect::bounding(path.iter().copied()) else {
        return Vec::new();
    };
    let reach = path_bounds.inflate(radius);
    strokes
        .iter()
        .filter(|stroke| reach.intersects(&stroke.bounds.inflate(stroke.width / 2.0)))
        .filter(|stroke| {
            sample_points(&stroke.points)
                .into_iter()
                .any(|point| distance_to_path(path, point.x, point.y) <= radius)
        })
        .collect()
}

/// Union of the strokes' boxes, each padded, or `None` for no strokes.
pub fn dirty_rect<'a, I>(strokes: I, padding: f32) -> Option<Rect>
where
    I: IntoIterator<Item = &'a Stroke>,
{
    strokes
        .into_iter()
        .map(|stroke| stroke.bounds.inflate(padding))
        .reduce(Rect::union)
}

fn distance_to_path(path: &[(f32, f32)], x: f32, y: f32) -> f32 {
    match path {
        [] => f32::INFINITY,
        [(px, py)] => (x - px).hypot(y - py),
        _ => path
            .windows(2)
            .map(|seg| distance_to_segment(seg[0], seg[1], x, y))
            .fold(f32::INFINITY, f32::min),
    }
}

fn distance_to_segment(a: (f32, f32), b: (f32, f32), x: f32, y: f32) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (x - a.0).hypot(y - a.1);
    }
    let t = (((x - a.0) * dx + (y - a.1) * dy) / len_sq).clamp(0.0, 1.0);
    (x - (a.0 + t * dx)).hypot(y - (a.1 + t * dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ink::model::fixtures::{stroke_with_n_points, stroke_with_points};

    #[test]
    fn sample_size_follows_point_count() {
        let sizes: Vec<usize> = [2, 9, 30, 120, 500]
            .iter()
            .map(|&n| sample_points(&stroke_with_n_points("s", "n", n).points).len())
            .collect();
        assert_eq!(sizes, vec![2, 9, 10, 12, 20]);
    }

    #[test]
    fn samples_include_both_ends() {
        let stroke = stroke_with_n_points("s", "n", 500);
        let sample = sample_points(&stroke.points);
        assert_eq!(sample[0].sequence, 0);
        assert_eq!(sample[sample.len() - 1].sequence, 499);
    }

    #[test]
    fn erase_hits_only_strokes_near_the_path() {
        let strokes = vec![
            stroke_with_points("near", "n", &[(100.0, 100.0), (120.0, 100.0)]),
            stroke_with_points("far", "n", &[(400.0, 400.0), (420.0, 400.0)]),
        ];
        let path = [(90.0, 90.0), (130.0, 110.0)];
        let hit: Vec<&str> = find_strokes_to_erase(&strokes, &path, 15.0)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(hit, vec!["near"]);
        assert!(find_strokes_to_erase(&strokes, &[], 15.0).is_empty());
    }

    #[test]
    fn overlapping_boxes_without_nearby_points_are_kept() {
        let strokes = vec![stroke_with_points(
            "diagonal",
            "n",
            &[(0.0, 0.0), (100.0, 100.0)],
        )];
        let path = [(90.0, 5.0)];
        assert!(find_strokes_to_erase(&strokes, &path, 10.0).is_empty());
    }

    #[test]
    fn dirty_rect_unions_padded_boxes() {
        let a = stroke_with_points("a", "n", &[(0.0, 0.0), (10.0, 10.0)]);
        let b = stroke_with_points("b", "n", &[(50.0, 20.0), (60.0, 40.0)]);
        assert_eq!(dirty_rect([&a, &b], 5.0), Some(Rect::new(-5.0, -5.0, 65.0, 45.0)));
        assert_eq!(dirty_rect(std::iter::empty::<&Stroke>(), 5.0), None);
    }
}

use geo::BoundingRect;
use geo_types::{Coord, LineString};
use rstar::{Envelope, AABB};
use std::f64::consts::PI;

/// Bounding box in degrees (`[lon, lat]` corners) or meters, depending on context.
pub type Bbox = AABB<[f64; 2]>;

/// Mean earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Meters covered by one degree of latitude on the mean sphere.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS * PI / 180.0;

/// Equirectangular projection around a fixed reference latitude.
///
/// Distances between points projected by the same `Projector` are metric
/// within the few kilometers of a city extent. Points from projectors with a
/// different origin must never be compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    ref_lat: f64,
    cos_ref_lat: f64,
}

impl Projector {
    pub fn new(ref_lat: f64) -> Self {
        Projector {
            ref_lat,
            cos_ref_lat: ref_lat.to_radians().cos(),
        }
    }

    /// Projector centered between the min and max latitude of `bbox`.
    pub fn for_bbox(bbox: &Bbox) -> Self {
        let mid_lat = (bbox.lower()[1] + bbox.upper()[1]) / 2.0;
        Self::new(mid_lat)
    }

    pub fn ref_lat(&self) -> f64 {
        self.ref_lat
    }

    pub fn to_planar(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: coord.x.to_radians() * self.cos_ref_lat * EARTH_RADIUS,
            y: coord.y.to_radians() * EARTH_RADIUS,
        }
    }

    pub fn project(&self, line: &LineString<f64>) -> Vec<Coord<f64>> {
        line.coords().map(|c| self.to_planar(*c)).collect()
    }

    /// Degree offsets `(lon, lat)` that cover `meters` around the reference latitude.
    pub fn degree_span(&self, meters: f64) -> (f64, f64) {
        let lat = meters / METERS_PER_DEGREE;
        // meridians converge towards the poles; keep the divisor away from zero
        let lon = lat / self.cos_ref_lat.abs().max(1e-6);
        (lon, lat)
    }
}

/// Extent of a polyline in degrees, `None` for an empty line.
pub fn line_bbox(line: &LineString<f64>) -> Option<Bbox> {
    let rect = line.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x, rect.min().y],
        [rect.max().x, rect.max().y],
    ))
}

/// Grows `bbox` by `dx` horizontally and `dy` vertically on every side.
pub fn expand_bbox(bbox: &Bbox, dx: f64, dy: f64) -> Bbox {
    let [min_x, min_y] = bbox.lower();
    let [max_x, max_y] = bbox.upper();
    AABB::from_corners([min_x - dx, min_y - dy], [max_x + dx, max_y + dy])
}

/// Union of all line extents, `None` if every line is empty.
pub fn union_bbox<'a, I>(boxes: I) -> Option<Bbox>
where
    I: IntoIterator<Item = &'a Bbox>,
{
    boxes.into_iter().fold(None, |acc: Option<Bbox>, bbox| match acc {
        Some(acc) => Some(acc.merged(bbox)),
        None => Some(*bbox),
    })
}

pub fn point_segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = b - a;
    let len_2 = d.x * d.x + d.y * d.y;
    if len_2 == 0.0 {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * d.x + (p.y - a.y) * d.y) / len_2).clamp(0.0, 1.0);
    let closest = Coord {
        x: a.x + t * d.x,
        y: a.y + t * d.y,
    };
    distance(p, closest)
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> i8 {
    let cross = (b.y - a.y) * (c.x - b.x) - (b.x - a.x) * (c.y - b.y);
    if cross > 0.0 {
        1
    } else if cross < 0.0 {
        -1
    } else {
        0
    }
}

/// `q` lies within the box spanned by the collinear segment `p`–`r`.
fn on_segment(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// True if the segments cross, touch or overlap collinearly.
pub fn segments_intersect(a1: Coord<f64>, a2: Coord<f64>, b1: Coord<f64>, b2: Coord<f64>) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && on_segment(a1, b1, a2))
        || (o2 == 0 && on_segment(a1, b2, a2))
        || (o3 == 0 && on_segment(b1, a1, b2))
        || (o4 == 0 && on_segment(b1, a2, b2))
}

pub fn segment_distance(a1: Coord<f64>, a2: Coord<f64>, b1: Coord<f64>, b2: Coord<f64>) -> f64 {
    if segments_intersect(a1, a2, b1, b2) {
        return 0.0;
    }
    point_segment_distance(a1, b1, b2)
        .min(point_segment_distance(a2, b1, b2))
        .min(point_segment_distance(b1, a1, a2))
        .min(point_segment_distance(b2, a1, a2))
}

/// Bearing of `a`→`b` in radians, `None` for a zero-length segment.
pub fn segment_bearing(a: Coord<f64>, b: Coord<f64>) -> Option<f64> {
    if a == b {
        return None;
    }
    Some((b.y - a.y).atan2(b.x - a.x))
}

/// Smallest angle between two undirected bearings, in `[0, π/2]`.
pub fn bearing_delta(a: f64, b: f64) -> f64 {
    let mut delta = (a - b).abs() % (2.0 * PI);
    if delta > PI {
        delta = 2.0 * PI - delta;
    }
    delta.min(PI - delta)
}

/// Start-to-end bearing of a projected line.
///
/// When the line closes on itself the last point that differs from the start
/// is used instead of the end.
pub fn overall_bearing(points: &[Coord<f64>]) -> Option<f64> {
    let first = *points.first()?;
    let last = points.iter().rev().find(|p| **p != first)?;
    segment_bearing(first, *last)
}

/// Consecutive point pairs of a projected line; a lone point is a degenerate segment.
pub fn segments(points: &[Coord<f64>]) -> Vec<(Coord<f64>, Coord<f64>)> {
    match points {
        [] => Vec::new(),
        [p] => vec![(*p, *p)],
        _ => points.windows(2).map(|w| (w[0], w[1])).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::line_string;

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn point_segment_distance_clamps_to_endpoints() {
        let (a, b) = (c(0.0, 0.0), c(10.0, 0.0));
        assert_eq!(point_segment_distance(c(5.0, 3.0), a, b), 3.0);
        assert_eq!(point_segment_distance(c(-3.0, 4.0), a, b), 5.0);
        assert_eq!(point_segment_distance(c(13.0, 4.0), a, b), 5.0);
        assert_eq!(point_segment_distance(c(3.0, 4.0), a, a), 5.0);
    }

    #[test]
    fn crossing_and_touching_segments_intersect() {
        assert!(segments_intersect(c(0.0, 0.0), c(2.0, 2.0), c(0.0, 2.0), c(2.0, 0.0)));
        assert!(segments_intersect(c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(1.0, 5.0)));
        // collinear overlap
        assert!(segments_intersect(c(0.0, 0.0), c(4.0, 0.0), c(2.0, 0.0), c(6.0, 0.0)));
        assert!(!segments_intersect(c(0.0, 0.0), c(1.0, 0.0), c(2.0, 0.0), c(3.0, 0.0)));
        assert!(!segments_intersect(c(0.0, 0.0), c(1.0, 0.0), c(0.0, 1.0), c(1.0, 1.0)));
    }

    #[test]
    fn segment_distance_of_parallel_segments() {
        let d = segment_distance(c(0.0, 0.0), c(10.0, 0.0), c(2.0, 4.0), c(8.0, 4.0));
        assert!((d - 4.0).abs() < 1e-12);
        assert_eq!(
            segment_distance(c(0.0, 0.0), c(2.0, 2.0), c(0.0, 2.0), c(2.0, 0.0)),
            0.0
        );
    }

    #[test]
    fn bearing_delta_ignores_direction() {
        let ten = 10f64.to_radians();
        assert!(bearing_delta(ten, 190f64.to_radians()) < 1e-9);
        assert!(bearing_delta(ten, -170f64.to_radians()) < 1e-9);
        let d = bearing_delta(0.0, 100f64.to_radians());
        assert!((d - 80f64.to_radians()).abs() < 1e-9);
        let d = bearing_delta(0.0, 45f64.to_radians());
        assert!((d - 45f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn zero_length_segment_has_no_bearing() {
        assert_eq!(segment_bearing(c(1.0, 1.0), c(1.0, 1.0)), None);
        assert_eq!(segment_bearing(c(0.0, 0.0), c(0.0, 1.0)), Some(PI / 2.0));
    }

    #[test]
    fn overall_bearing_walks_back_on_closed_lines() {
        let closed = [c(0.0, 0.0), c(5.0, 0.0), c(5.0, 5.0), c(0.0, 0.0)];
        let bearing = overall_bearing(&closed).unwrap();
        assert!((bearing - PI / 4.0).abs() < 1e-12);
        assert_eq!(overall_bearing(&[c(1.0, 1.0), c(1.0, 1.0)]), None);
        assert_eq!(overall_bearing(&[]), None);
    }

    #[test]
    fn projector_scales_longitude_by_latitude() {
        let projector = Projector::new(60.0);
        let p = projector.to_planar(c(1.0, 0.0));
        assert!((p.x - METERS_PER_DEGREE * 0.5).abs() < 1e-6);
        let q = projector.to_planar(c(0.0, 1.0));
        assert!((q.y - METERS_PER_DEGREE).abs() < 1e-6);

        let (lon, lat) = projector.degree_span(METERS_PER_DEGREE);
        assert!((lat - 1.0).abs() < 1e-12);
        assert!((lon - 2.0).abs() < 1e-9);
    }

    #[test]
    fn line_bbox_covers_all_coordinates() {
        let line = line_string![(x: 1.0, y: 5.0), (x: -2.0, y: 3.0), (x: 4.0, y: 4.0)];
        let bbox = line_bbox(&line).unwrap();
        assert_eq!(bbox.lower(), [-2.0, 3.0]);
        assert_eq!(bbox.upper(), [4.0, 5.0]);
        assert!(line_bbox(&LineString::new(vec![])).is_none());
    }
}

use crate::geometry::{self, bearing_delta, segment_bearing, segment_distance};
use crate::index::SpatialIndex;
use crate::{Error, Result};
use geo_types::{Coord, LineString};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// User-facing matching thresholds, in meters and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub max_match_meters: f64,
    pub max_angle_deg: f64,
    pub max_overall_angle_deg: f64,
    pub priority_bias_meters: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            max_match_meters: 30.0,
            max_angle_deg: 30.0,
            max_overall_angle_deg: 60.0,
            priority_bias_meters: 1.0,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<MatchParams> {
        if !(self.max_match_meters.is_finite() && self.max_match_meters > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "match distance must be positive, got {}",
                self.max_match_meters
            )));
        }
        for (name, angle) in [
            ("segment angle", self.max_angle_deg),
            ("overall angle", self.max_overall_angle_deg),
        ] {
            if !(0.0..=180.0).contains(&angle) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be within 0..=180 degrees, got {}",
                    name, angle
                )));
            }
        }
        if !(self.priority_bias_meters.is_finite() && self.priority_bias_meters >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "priority bias must not be negative, got {}",
                self.priority_bias_meters
            )));
        }
        Ok(MatchParams {
            max_distance: self.max_match_meters,
            max_segment_angle: self.max_angle_deg.to_radians(),
            max_overall_angle: self.max_overall_angle_deg.to_radians(),
            priority_bias: self.priority_bias_meters,
        })
    }
}

/// Thresholds as consumed by [`SpatialIndex::nearest_match`]: meters and radians.
///
/// An angle limit of zero disables that angle filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub max_distance: f64,
    pub max_segment_angle: f64,
    pub max_overall_angle: f64,
    pub priority_bias: f64,
}

impl MatchParams {
    /// Copy of these thresholds that always picks the nearest line.
    pub fn unbiased(&self) -> Self {
        MatchParams {
            priority_bias: 0.0,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub priority: u8,
    pub object_id: Option<u64>,
    /// Distance to the matched line in meters.
    pub distance: f64,
    /// Position of the matched line in [`SpatialIndex::lines`].
    #[serde(skip)]
    pub line_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Eligible {
    line_index: usize,
    distance: f64,
}

/// Minimum distance between two projected lines over the segment pairs whose
/// directions agree within `max_segment_angle`. `None` if every pair was rejected.
fn line_distance(query: &[Coord<f64>], candidate: &[Coord<f64>], max_segment_angle: f64) -> Option<f64> {
    let query_segments = geometry::segments(query);
    let candidate_segments = geometry::segments(candidate);
    let mut best: Option<f64> = None;
    for &(a1, a2) in &query_segments {
        let query_bearing = segment_bearing(a1, a2);
        for &(b1, b2) in &candidate_segments {
            if max_segment_angle > 0.0 {
                if let (Some(qb), Some(cb)) = (query_bearing, segment_bearing(b1, b2)) {
                    if bearing_delta(qb, cb) > max_segment_angle {
                        continue;
                    }
                }
            }
            let d = segment_distance(a1, a2, b1, b2);
            best = Some(best.map_or(d, |b| b.min(d)));
        }
    }
    best
}

impl SpatialIndex {
    /// Best reference line for `query`, or `None` when nothing qualifies.
    ///
    /// The nearest eligible line fixes the search window; within
    /// `priority_bias` meters of it the line with the lowest priority value
    /// wins, ties going to the nearer line.
    pub fn nearest_match(&self, query: &LineString<f64>, params: &MatchParams) -> Option<MatchResult> {
        let query_bbox = geometry::line_bbox(query)?;
        let (dlon, dlat) = self.projector().degree_span(params.max_distance);
        let window = geometry::expand_bbox(&query_bbox, dlon, dlat);

        let candidates = self.candidates(&window);
        if candidates.is_empty() {
            return None;
        }

        let planar = self.projector().project(query);
        let query_bearing = geometry::overall_bearing(&planar);

        // pass 1: distances of every eligible candidate and their minimum
        let mut eligible = Vec::with_capacity(candidates.len());
        let mut min_distance = f64::INFINITY;
        for line_index in candidates {
            let indexed = self.indexed(line_index);
            if params.max_overall_angle > 0.0 {
                if let (Some(qb), Some(cb)) = (query_bearing, indexed.bearing) {
                    if bearing_delta(qb, cb) > params.max_overall_angle {
                        continue;
                    }
                }
            }
            if let Some(distance) = line_distance(&planar, &indexed.planar, params.max_segment_angle) {
                min_distance = min_distance.min(distance);
                eligible.push(Eligible {
                    line_index,
                    distance,
                });
            }
        }
        if eligible.is_empty() || min_distance > params.max_distance {
            return None;
        }

        // pass 2: prefer higher priority within the bias window
        let cutoff = min_distance + params.priority_bias.max(0.0);
        let mut best: Option<(u8, Eligible)> = None;
        for candidate in eligible {
            if candidate.distance > cutoff || candidate.distance > params.max_distance {
                continue;
            }
            let priority = self.lines()[candidate.line_index].priority;
            let better = match best {
                None => true,
                Some((best_priority, best_candidate)) => {
                    priority < best_priority
                        || (priority == best_priority && candidate.distance < best_candidate.distance)
                }
            };
            if better {
                best = Some((priority, candidate));
            }
        }

        let (priority, winner) = best?;
        let line = &self.lines()[winner.line_index];
        trace!(
            line_index = winner.line_index,
            distance = winner.distance,
            priority,
            "matched reference line"
        );
        Some(MatchResult {
            priority,
            object_id: line.object_id,
            distance: winner.distance,
            line_index: winner.line_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ReferenceLine;
    use geo_types::line_string;

    fn params() -> MatchParams {
        MatchConfig::default().validate().unwrap()
    }

    fn horizontal(lat: f64, priority: u8, id: u64) -> ReferenceLine {
        ReferenceLine::new(
            line_string![(x: 0.0, y: lat), (x: 0.001, y: lat)],
            priority,
            Some(id),
        )
    }

    fn query() -> LineString<f64> {
        line_string![(x: 0.0, y: 0.0), (x: 0.001, y: 0.0)]
    }

    #[test]
    fn matches_the_nearest_line() {
        let index = SpatialIndex::new(vec![horizontal(0.0002, 2, 1), horizontal(0.0001, 2, 2)], 8, 8).unwrap();
        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.object_id, Some(2));
        assert!((result.distance - 11.12).abs() < 0.05);
    }

    #[test]
    fn never_matches_beyond_max_distance() {
        // ~33m north, just outside the default 30m
        let index = SpatialIndex::new(vec![horizontal(0.0003, 1, 1)], 8, 8).unwrap();
        assert!(index.nearest_match(&query(), &params()).is_none());

        let wide = MatchConfig {
            max_match_meters: 40.0,
            ..MatchConfig::default()
        }
        .validate()
        .unwrap();
        let result = index.nearest_match(&query(), &wide).unwrap();
        assert!(result.distance <= 40.0);
    }

    #[test]
    fn bias_prefers_farther_higher_priority_line() {
        // ~11.1m with priority 2 and ~11.7m with priority 1
        let lines = vec![horizontal(0.0001, 2, 1), horizontal(-0.000105, 1, 2)];
        let index = SpatialIndex::new(lines, 8, 8).unwrap();

        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.priority, 1);
        assert_eq!(result.object_id, Some(2));

        let nearest = index.nearest_match(&query(), &params().unbiased()).unwrap();
        assert_eq!(nearest.priority, 2);
        assert_eq!(nearest.object_id, Some(1));
    }

    #[test]
    fn bias_window_is_bounded() {
        // priority 1 line is ~5.5m farther than the priority 3 line
        let lines = vec![horizontal(0.0001, 3, 1), horizontal(-0.00015, 1, 2)];
        let index = SpatialIndex::new(lines, 8, 8).unwrap();
        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.object_id, Some(1));
    }

    #[test]
    fn equal_priorities_fall_back_to_distance() {
        let lines = vec![horizontal(0.0001, 1, 1), horizontal(-0.0000995, 1, 2)];
        let index = SpatialIndex::new(lines, 8, 8).unwrap();
        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.object_id, Some(2));
    }

    #[test]
    fn crossing_lines_are_rejected_by_angle() {
        let crossing = ReferenceLine::new(
            line_string![(x: 0.0005, y: -0.0005), (x: 0.0005, y: 0.0005)],
            1,
            Some(9),
        );
        let index = SpatialIndex::new(vec![crossing], 8, 8).unwrap();
        assert!(index.nearest_match(&query(), &params()).is_none());

        let permissive = MatchConfig {
            max_angle_deg: 0.0,
            max_overall_angle_deg: 0.0,
            ..MatchConfig::default()
        }
        .validate()
        .unwrap();
        let result = index.nearest_match(&query(), &permissive).unwrap();
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn reversed_lines_still_match() {
        let reversed = ReferenceLine::new(
            line_string![(x: 0.001, y: 0.0001), (x: 0.0, y: 0.0001)],
            3,
            Some(4),
        );
        let index = SpatialIndex::new(vec![reversed], 8, 8).unwrap();
        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.priority, 3);
    }

    #[test]
    fn repeated_point_candidates_are_not_angle_tested() {
        let point = ReferenceLine::new(
            line_string![(x: 0.0005, y: 0.0001), (x: 0.0005, y: 0.0001), (x: 0.0005, y: 0.0001)],
            2,
            Some(1),
        );
        let index = SpatialIndex::new(vec![point], 8, 8).unwrap();
        assert!(index.indexed(0).bearing.is_none());

        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.priority, 2);
        assert_eq!(result.object_id, Some(1));
        assert!((result.distance - 11.12).abs() < 0.05);
    }

    #[test]
    fn single_point_queries_match() {
        let index = SpatialIndex::new(vec![horizontal(0.0, 1, 1)], 8, 8).unwrap();
        let point = line_string![(x: 0.0005, y: 0.00005)];

        let result = index.nearest_match(&point, &params()).unwrap();
        assert_eq!(result.priority, 1);
        assert!((result.distance - 5.56).abs() < 0.05);
    }

    #[test]
    fn closed_loops_keep_a_bearing_and_match() {
        let loop_line = ReferenceLine::new(
            line_string![
                (x: 0.0, y: 0.0001),
                (x: 0.001, y: 0.0001),
                (x: 0.001, y: 0.0002),
                (x: 0.0, y: 0.0001),
            ],
            3,
            Some(6),
        );
        let index = SpatialIndex::new(vec![loop_line], 8, 8).unwrap();
        assert!(index.indexed(0).bearing.is_some());

        let result = index.nearest_match(&query(), &params()).unwrap();
        assert_eq!(result.object_id, Some(6));
        assert!((result.distance - 11.12).abs() < 0.05);
    }

    #[test]
    fn empty_query_is_not_found() {
        let index = SpatialIndex::new(vec![horizontal(0.0, 1, 1)], 8, 8).unwrap();
        assert!(index.nearest_match(&LineString::new(vec![]), &params()).is_none());
    }

    #[test]
    fn rejects_invalid_thresholds() {
        let negative_bias = MatchConfig {
            priority_bias_meters: -1.0,
            ..MatchConfig::default()
        };
        assert!(matches!(negative_bias.validate(), Err(Error::InvalidConfig(_))));

        let zero_distance = MatchConfig {
            max_match_meters: 0.0,
            ..MatchConfig::default()
        };
        assert!(zero_distance.validate().is_err());

        let wide_angle = MatchConfig {
            max_angle_deg: 270.0,
            ..MatchConfig::default()
        };
        assert!(wide_angle.validate().is_err());
    }
}

//! # Path Distance Index
//!
//! Immutable cumulative-distance index over an ordered polyline. Maps between
//! vertex index, along-path distance, interpolated position and normalized progress.
//!
//! ## Algorithm
//! 1. Drop non-finite vertices (logged), fail on an empty remainder
//! 2. Classify the coordinate domain once and keep the metric on the index
//! 3. Accumulate `cum[i] = cum[i-1] + dist(points[i-1], points[i])`
//!
//! Lookups by distance are binary searches over `cum`. Nearest-point queries are
//! linear scans; the default scan stops early once a vertex lies within
//! [`CLOSE_ENOUGH_DEFAULT`] of the query, [`PathIndex::nearest_point_exhaustive`] never
//! does.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::geo_utils::{lerp_position, project_onto_segment, DistanceMetric, MetricSelection};
use crate::Position;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Early-exit tolerance for [`PathIndex::nearest_point`], in the path's distance units.
///
/// A vertex at or below this distance from the query ends the scan. The returned
/// vertex is then within this tolerance of the query but may not be the global
/// minimum.
pub const CLOSE_ENOUGH_DEFAULT: f64 = 1.0;

/// Result of a nearest-vertex query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearestPoint {
    /// Distance from the query to the vertex (`+inf` when nothing was found)
    pub distance: f64,
    /// Vertex index (`-1` when nothing was found)
    pub index: isize,
    /// The vertex itself
    pub point: Position,
    /// Progress of the vertex along the path (0..1)
    pub progress: f64,
}

impl NearestPoint {
    /// The "no vertex" result.
    pub const NONE: NearestPoint = NearestPoint {
        distance: f64::INFINITY,
        index: -1,
        point: Position { x: f64::NAN, y: f64::NAN, z: None },
        progress: 0.0,
    };

    /// True if a vertex was found.
    pub fn is_found(&self) -> bool {
        self.index >= 0
    }
}

/// Result of projecting a position onto the polyline's segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathProjection {
    /// Along-path distance of the foot point
    pub along_distance: f64,
    /// Normalized progress of the foot point
    pub progress: f64,
    /// Distance from the query to the foot point
    pub offset: f64,
    /// The foot point
    pub point: Position,
    /// Index of the segment's first vertex
    pub segment_index: usize,
}

/// Precomputed distance index over an ordered sequence of positions.
///
/// # Example
/// ```
/// use route_pacer::{PathIndex, Position};
///
/// let path = PathIndex::build(vec![
///     Position::new(0.0, 0.0),
///     Position::new(0.0, 100.0),
///     Position::new(0.0, 300.0),
/// ]).unwrap();
///
/// assert_eq!(path.total_distance(), 300.0);
/// assert_eq!(path.point_at_distance(150.0), Position::new(0.0, 150.0));
/// assert_eq!(path.index_at_distance(300.0), 2);
/// ```
#[derive(Debug, Clone)]
pub struct PathIndex {
    points: Vec<Position>,
    cum: Vec<f64>,
    metric: DistanceMetric,
    close_enough: f64,
}

impl PathIndex {
    /// Build an index, classifying the coordinate domain automatically.
    pub fn build(points: Vec<Position>) -> Result<Self> {
        Self::build_with(points, MetricSelection::Auto, CLOSE_ENOUGH_DEFAULT)
    }

    /// Build an index with a fixed distance metric.
    pub fn build_with_metric(points: Vec<Position>, metric: DistanceMetric) -> Result<Self> {
        Self::build_with(points, MetricSelection::Fixed(metric), CLOSE_ENOUGH_DEFAULT)
    }

    /// Build an index with full control over metric selection and early-exit tolerance.
    pub fn build_with(points: Vec<Position>, selection: MetricSelection, close_enough: f64) -> Result<Self> {
        let input_len = points.len();
        let points: Vec<Position> = points.into_iter().filter(|p| p.is_finite()).collect();

        if points.len() < input_len {
            warn!(
                "[PathIndex] Dropped {} non-finite points of {}",
                input_len - points.len(),
                input_len
            );
        }

        if points.is_empty() {
            return Err(TrackingError::EmptyPath);
        }

        let metric = selection.resolve(&points);

        let mut cum = Vec::with_capacity(points.len());
        cum.push(0.0);
        for w in points.windows(2) {
            let last = cum[cum.len() - 1];
            cum.push(last + metric.distance(&w[0], &w[1]));
        }

        let index = Self {
            points,
            cum,
            metric,
            close_enough: if close_enough.is_finite() { close_enough.max(0.0) } else { 0.0 },
        };

        info!(
            "[PathIndex] Built {} points, {:.1} units ({:?})",
            index.len(),
            index.total_distance(),
            index.metric
        );

        Ok(index)
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: construction rejects empty paths.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Position] {
        &self.points
    }

    /// Cumulative distance per vertex.
    pub fn cumulative(&self) -> &[f64] {
        &self.cum
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Early-exit tolerance used by [`PathIndex::nearest_point`].
    pub fn close_enough(&self) -> f64 {
        self.close_enough
    }

    pub fn total_distance(&self) -> f64 {
        self.cum[self.cum.len() - 1]
    }

    /// Distance between two positions using this path's metric.
    #[inline]
    pub fn distance_between(&self, a: &Position, b: &Position) -> f64 {
        self.metric.distance(a, b)
    }

    /// Cumulative distance at vertex `i`, clamped to the last vertex.
    pub fn distance_at_index(&self, i: usize) -> f64 {
        self.cum[i.min(self.len() - 1)]
    }

    /// Progress (0..1) at vertex `i`. Zero-length paths report 0.
    pub fn progress_at_index(&self, i: usize) -> f64 {
        self.progress_at_distance(self.distance_at_index(i))
    }

    /// Progress (0..1) at an along-path distance.
    pub fn progress_at_distance(&self, d: f64) -> f64 {
        let total = self.total_distance();
        if total <= 0.0 || !d.is_finite() {
            return 0.0;
        }
        (d / total).clamp(0.0, 1.0)
    }

    /// Along-path distance at a progress value (0..1).
    pub fn distance_at_progress(&self, progress: f64) -> f64 {
        if !progress.is_finite() {
            return 0.0;
        }
        progress.clamp(0.0, 1.0) * self.total_distance()
    }

    /// First vertex whose cumulative distance is not less than `d`.
    pub fn index_at_distance(&self, d: f64) -> usize {
        // NaN falls into the first branch
        if !(d > 0.0) {
            return 0;
        }
        if d >= self.total_distance() {
            return self.len() - 1;
        }
        self.cum.partition_point(|&c| c < d)
    }

    /// Interpolated position at an along-path distance.
    pub fn point_at_distance(&self, d: f64) -> Position {
        let idx = self.index_at_distance(d);
        if idx == 0 {
            return self.points[0];
        }

        let (a, b) = (idx - 1, idx);
        let seg = self.cum[b] - self.cum[a];
        if seg <= 0.0 {
            return self.points[a];
        }

        let d = d.min(self.total_distance());
        let t = ((d - self.cum[a]) / seg).clamp(0.0, 1.0);
        lerp_position(&self.points[a], &self.points[b], t)
    }

    /// Nearest vertex to `query`.
    ///
    /// Vertices farther than `search_budget` (when given) are ignored. The scan
    /// stops at the first vertex within [`PathIndex::close_enough`]. Use
    /// [`PathIndex::nearest_point_exhaustive`] when the global minimum is required.
    pub fn nearest_point(&self, query: &Position, search_budget: Option<f64>) -> NearestPoint {
        if !query.is_finite() {
            return NearestPoint::NONE;
        }

        let budget = search_budget.unwrap_or(f64::INFINITY);
        let mut best_idx: Option<usize> = None;
        let mut best_dist = f64::INFINITY;

        for (i, p) in self.points.iter().enumerate() {
            let d = self.metric.distance(query, p);
            if d <= budget && d < best_dist {
                best_dist = d;
                best_idx = Some(i);
                if d <= self.close_enough {
                    break;
                }
            }
        }

        self.nearest_result(best_idx, best_dist)
    }

    /// Nearest vertex to `query`, scanning every vertex. Ties pick the lowest index.
    pub fn nearest_point_exhaustive(&self, query: &Position, search_budget: Option<f64>) -> NearestPoint {
        if !query.is_finite() {
            return NearestPoint::NONE;
        }

        let budget = search_budget.unwrap_or(f64::INFINITY);

        #[cfg(feature = "parallel")]
        let best = self
            .points
            .par_iter()
            .enumerate()
            .map(|(i, p)| (self.metric.distance(query, p), i))
            .filter(|(d, _)| *d <= budget)
            .reduce_with(|a, b| if b.0 < a.0 || (b.0 == a.0 && b.1 < a.1) { b } else { a });

        #[cfg(not(feature = "parallel"))]
        let best = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (self.metric.distance(query, p), i))
            .filter(|(d, _)| *d <= budget)
            .fold(None, |acc: Option<(f64, usize)>, cur| match acc {
                Some(a) if a.0 <= cur.0 => Some(a),
                _ => Some(cur),
            });

        match best {
            Some((d, i)) => self.nearest_result(Some(i), d),
            None => NearestPoint::NONE,
        }
    }

    fn nearest_result(&self, idx: Option<usize>, dist: f64) -> NearestPoint {
        match idx {
            Some(i) => NearestPoint {
                distance: dist,
                index: i as isize,
                point: self.points[i],
                progress: self.progress_at_index(i),
            },
            None => NearestPoint::NONE,
        }
    }

    /// Project `query` onto the closest segment of the whole path.
    pub fn project(&self, query: &Position) -> Option<PathProjection> {
        self.project_within(query, 0.0, self.total_distance())
    }

    /// Project `query` onto the closest segment overlapping the along-path window
    /// `[from, to]`. Ties pick the lowest segment. Returns `None` for non-finite
    /// queries or a window that touches no segment.
    pub fn project_within(&self, query: &Position, from: f64, to: f64) -> Option<PathProjection> {
        self.candidates(query, from, to)?
            .into_iter()
            .fold(None, |best: Option<PathProjection>, cur| match best {
                Some(b) if b.offset <= cur.offset => Some(b),
                _ => Some(cur),
            })
    }

    /// Project `query` near a previously known along-path distance `last`.
    ///
    /// Only segments within `window` of `last` are considered. Among projections whose
    /// offset is within [`PathIndex::close_enough`] of the best one, the nearest at or
    /// ahead of `last` wins; failing that, the nearest behind it. This keeps progress
    /// moving forward where a route doubles back on itself.
    pub fn project_near(&self, query: &Position, last: f64, window: f64) -> Option<PathProjection> {
        let candidates = self.candidates(query, last - window, last + window)?;
        let best_offset = candidates.iter().map(|p| p.offset).fold(f64::INFINITY, f64::min);
        let tied = candidates
            .into_iter()
            .filter(|p| p.offset <= best_offset + self.close_enough);

        let (ahead, behind): (Vec<_>, Vec<_>) = tied.partition(|p| p.along_distance >= last);
        ahead
            .into_iter()
            .min_by(|a, b| a.along_distance.total_cmp(&b.along_distance))
            .or_else(|| {
                behind
                    .into_iter()
                    .max_by(|a, b| a.along_distance.total_cmp(&b.along_distance))
            })
    }

    /// Per-segment projections for segments overlapping `[from, to]`, in path order.
    fn candidates(&self, query: &Position, from: f64, to: f64) -> Option<Vec<PathProjection>> {
        if !query.is_finite() || from.is_nan() || to.is_nan() || from > to {
            return None;
        }

        if self.len() == 1 {
            let p = self.points[0];
            return Some(vec![PathProjection {
                along_distance: 0.0,
                progress: 0.0,
                offset: self.metric.distance(query, &p),
                point: p,
                segment_index: 0,
            }]);
        }

        let candidates: Vec<PathProjection> = (0..self.len() - 1)
            .filter(|&i| self.cum[i + 1] >= from && self.cum[i] <= to)
            .map(|i| self.project_onto(i, query))
            .collect();

        if candidates.is_empty() {
            None
        } else {
            Some(candidates)
        }
    }

    fn project_onto(&self, i: usize, query: &Position) -> PathProjection {
        let (a, b) = (&self.points[i], &self.points[i + 1]);
        let t = project_onto_segment(self.metric, a, b, query);
        let foot = lerp_position(a, b, t);
        let along = self.cum[i] + t * (self.cum[i + 1] - self.cum[i]);
        PathProjection {
            along_distance: along,
            progress: self.progress_at_distance(along),
            offset: self.metric.distance(query, &foot),
            point: foot,
            segment_index: i,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn scenario_path() -> PathIndex {
        PathIndex::build(vec![
            Position::new(0.0, 0.0),
            Position::new(0.0, 100.0),
            Position::new(0.0, 300.0),
        ])
        .unwrap()
    }

    fn zigzag(n: usize) -> PathIndex {
        let pts = (0..n)
            .map(|i| Position::new(i as f64 * 37.0, if i % 2 == 0 { 0.0 } else { 23.0 }))
            .collect();
        PathIndex::build_with_metric(pts, DistanceMetric::Planar).unwrap()
    }

    #[test]
    fn test_scenario_basic_lookups() {
        let path = scenario_path();
        assert_eq!(path.metric(), DistanceMetric::Planar);
        assert_eq!(path.total_distance(), 300.0);
        assert_eq!(path.point_at_distance(150.0), Position::new(0.0, 150.0));
        assert_eq!(path.index_at_distance(300.0), 2);
    }

    #[test]
    fn test_empty_path_fails() {
        assert_eq!(PathIndex::build(vec![]).unwrap_err(), TrackingError::EmptyPath);
    }

    #[test]
    fn test_all_non_finite_points_fail() {
        let pts = vec![Position::new(f64::NAN, 0.0), Position::new(0.0, f64::INFINITY)];
        assert_eq!(PathIndex::build(pts).unwrap_err(), TrackingError::EmptyPath);
    }

    #[test]
    fn test_non_finite_points_dropped() {
        let pts = vec![
            Position::new(0.0, 0.0),
            Position::new(f64::NAN, 50.0),
            Position::new(0.0, 100.0),
        ];
        let path = PathIndex::build(pts).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.total_distance(), 100.0);
    }

    #[test]
    fn test_cumulative_monotonic() {
        let path = zigzag(50);
        assert_eq!(path.cumulative()[0], 0.0);
        for w in path.cumulative().windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn test_index_at_distance_round_trip() {
        let path = zigzag(40);
        let max_seg = path
            .cumulative()
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0, f64::max);

        let total = path.total_distance();
        for step in 0..=200 {
            let d = total * step as f64 / 200.0;
            let back = path.distance_at_index(path.index_at_distance(d));
            assert!((back - d).abs() <= max_seg + 1e-9, "d={} back={}", d, back);
        }
    }

    #[test]
    fn test_index_at_distance_bounds_and_ties() {
        let path = scenario_path();
        assert_eq!(path.index_at_distance(-5.0), 0);
        assert_eq!(path.index_at_distance(0.0), 0);
        assert_eq!(path.index_at_distance(f64::NAN), 0);
        assert_eq!(path.index_at_distance(100.0), 1);
        assert_eq!(path.index_at_distance(100.5), 2);
        assert_eq!(path.index_at_distance(1e9), 2);
    }

    #[test]
    fn test_index_at_distance_duplicate_points() {
        // Lowest index whose cumulative distance is >= target
        let path = PathIndex::build(vec![
            Position::new(0.0, 0.0),
            Position::new(0.0, 100.0),
            Position::new(0.0, 100.0),
            Position::new(0.0, 200.0),
        ])
        .unwrap();
        assert_eq!(path.index_at_distance(100.0), 1);
        assert_eq!(path.point_at_distance(100.0), Position::new(0.0, 100.0));
    }

    #[test]
    fn test_distance_and_progress_at_index_clamp() {
        let path = scenario_path();
        assert_eq!(path.distance_at_index(1), 100.0);
        assert_eq!(path.distance_at_index(99), 300.0);
        assert!(approx_eq(path.progress_at_index(1), 1.0 / 3.0, 1e-12));
        assert_eq!(path.progress_at_index(99), 1.0);
    }

    #[test]
    fn test_single_point_path() {
        let path = PathIndex::build(vec![Position::new(5.0, 5.0)]).unwrap();
        assert_eq!(path.total_distance(), 0.0);
        assert_eq!(path.progress_at_index(0), 0.0);
        assert_eq!(path.point_at_distance(10.0), Position::new(5.0, 5.0));
        assert_eq!(path.index_at_distance(10.0), 0);
    }

    #[test]
    fn test_point_at_distance_clamps() {
        let path = scenario_path();
        assert_eq!(path.point_at_distance(-10.0), Position::new(0.0, 0.0));
        assert_eq!(path.point_at_distance(500.0), Position::new(0.0, 300.0));
    }

    #[test]
    fn test_nearest_point_matches_exhaustive_distance() {
        let path = zigzag(60);
        let queries = [
            Position::new(100.0, 40.0),
            Position::new(-20.0, -20.0),
            Position::new(1000.0, 10.0),
            Position::new(555.5, 11.5),
        ];
        for q in &queries {
            let fast = path.nearest_point(q, None);
            let full = path.nearest_point_exhaustive(q, None);
            assert!(fast.is_found());
            // Early exit may stop at another vertex, but only within tolerance
            assert!(fast.distance <= full.distance + path.close_enough());
        }
    }

    #[test]
    fn test_nearest_point_early_exit_within_tolerance() {
        // Two vertices both within tolerance of the query: the scan stops at the first
        let path = PathIndex::build_with(
            vec![Position::new(0.0, 0.0), Position::new(0.0, 0.5), Position::new(0.0, 0.9)],
            MetricSelection::Fixed(DistanceMetric::Planar),
            CLOSE_ENOUGH_DEFAULT,
        )
        .unwrap();
        let q = Position::new(0.0, 0.8);
        let fast = path.nearest_point(&q, None);
        let full = path.nearest_point_exhaustive(&q, None);
        assert_eq!(fast.index, 0);
        assert_eq!(full.index, 2);
        assert!(fast.distance <= CLOSE_ENOUGH_DEFAULT);
    }

    #[test]
    fn test_nearest_point_exhaustive_tie_picks_lowest_index() {
        let path = PathIndex::build_with_metric(
            vec![Position::new(-10.0, 0.0), Position::new(10.0, 0.0)],
            DistanceMetric::Planar,
        )
        .unwrap();
        let n = path.nearest_point_exhaustive(&Position::new(0.0, 5.0), None);
        assert_eq!(n.index, 0);
    }

    #[test]
    fn test_nearest_point_budget() {
        let path = scenario_path();
        let q = Position::new(50.0, 300.0);
        assert!(!path.nearest_point(&q, Some(10.0)).is_found());
        let n = path.nearest_point(&q, Some(60.0));
        assert_eq!(n.index, 2);
        assert_eq!(n.progress, 1.0);
    }

    #[test]
    fn test_nearest_point_non_finite_query() {
        let path = scenario_path();
        let n = path.nearest_point(&Position::new(f64::NAN, 0.0), None);
        assert_eq!(n.index, -1);
        assert!(n.distance.is_infinite());
    }

    #[test]
    fn test_project_onto_middle_of_segment() {
        let path = scenario_path();
        let proj = path.project(&Position::new(7.0, 250.0)).unwrap();
        assert_eq!(proj.segment_index, 1);
        assert!(approx_eq(proj.along_distance, 250.0, 1e-9));
        assert!(approx_eq(proj.offset, 7.0, 1e-9));
        assert!(approx_eq(proj.progress, 250.0 / 300.0, 1e-12));
    }

    #[test]
    fn test_project_within_window() {
        // Out-and-back: the same spot is at 50 and at 150
        let path = PathIndex::build(vec![
            Position::new(0.0, 0.0),
            Position::new(0.0, 100.0),
            Position::new(0.0, 0.0),
        ])
        .unwrap();
        let q = Position::new(0.0, 50.0);
        assert!(approx_eq(path.project(&q).unwrap().along_distance, 50.0, 1e-9));
        let back = path.project_within(&q, 120.0, 200.0).unwrap();
        assert!(approx_eq(back.along_distance, 150.0, 1e-9));
    }

    #[test]
    fn test_project_near_prefers_forward() {
        let path = PathIndex::build(vec![
            Position::new(0.0, 0.0),
            Position::new(0.0, 100.0),
            Position::new(0.0, 0.0),
        ])
        .unwrap();
        let q = Position::new(0.0, 80.0);
        // Both legs pass through 80; coming from 95 the return leg is ahead
        let proj = path.project_near(&q, 95.0, 50.0).unwrap();
        assert!(approx_eq(proj.along_distance, 120.0, 1e-9));
        // Coming from 60 the outbound leg is ahead
        let proj = path.project_near(&q, 60.0, 50.0).unwrap();
        assert!(approx_eq(proj.along_distance, 80.0, 1e-9));
        // Far outside the window nothing matches
        assert!(path.project_near(&q, 1000.0, 10.0).is_none());
    }

    #[test]
    fn test_geographic_path_distances() {
        let path = PathIndex::build(vec![
            Position::new(-0.1278, 51.5074),
            Position::new(-0.1278, 51.5164),
        ])
        .unwrap();
        assert_eq!(path.metric(), DistanceMetric::Geographic);
        // 0.009 degrees of latitude is about 1 km
        assert!(approx_eq(path.total_distance(), 1000.8, 5.0));
        let mid = path.point_at_distance(path.total_distance() / 2.0);
        assert!(approx_eq(mid.y, 51.5119, 1e-6));
    }
}

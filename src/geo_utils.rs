//! # Geometric Utilities
//!
//! Distance metrics and small geometry helpers shared by the path index, the
//! trackers and the replay engine.
//!
//! ## Overview
//!
//! | Item | Description |
//! |------|-------------|
//! | [`DistanceMetric`] | Planar (Euclidean) or geographic (haversine) distance |
//! | [`DistanceMetric::classify`] | One-time classification of a coordinate set |
//! | [`haversine_distance`] | Great-circle distance between two lon/lat positions |
//! | [`euclidean_distance`] | Straight-line distance between two planar positions |
//! | [`lerp_position`] | Linear interpolation between two positions |
//! | [`project_onto_segment`] | Foot of the perpendicular from a point onto a segment |
//!
//! ## Coordinate Domains
//!
//! Positions arrive already projected by an external collaborator, so the core never
//! converts between reference systems. It only has to decide *how to measure*:
//!
//! - **Geographic**: every point satisfies `|x| <= 180` and `|y| <= 90` (x is longitude,
//!   y is latitude) and the whole set spans less than [`GEOGRAPHIC_MAX_SPAN`] degrees on
//!   both axes. Distances are great-circle meters.
//! - **Planar**: anything else. Distances are Euclidean in projected units.
//!
//! The decision is made once, when a [`crate::PathIndex`] is built, and is stored on the
//! index. Callers that know better use [`crate::PathIndex::build_with_metric`].
//!
//! ## Example
//!
//! ```rust
//! use route_pacer::{Position, geo_utils::DistanceMetric};
//!
//! let track = vec![Position::new(0.0, 0.0), Position::new(0.0, 300.0)];
//! let metric = DistanceMetric::classify(&track);
//! assert_eq!(metric, DistanceMetric::Planar);
//! assert_eq!(metric.distance(&track[0], &track[1]), 300.0);
//! ```

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

use crate::Position;

/// Widest extent (degrees, on either axis) a coordinate set may cover and still be
/// classified as geographic. Athletic routes stay far below this; planar game or
/// projected coordinates with small magnitudes usually exceed it.
pub const GEOGRAPHIC_MAX_SPAN: f64 = 10.0;

// =============================================================================
// Distance Metrics
// =============================================================================

/// How distances between two positions are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean distance in projected units.
    Planar,
    /// Great-circle distance in meters, x = longitude, y = latitude.
    Geographic,
}

/// Metric selection for a route load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricSelection {
    /// Classify the route's coordinates with [`DistanceMetric::classify`].
    #[default]
    Auto,
    /// Use the given metric regardless of coordinate values.
    Fixed(DistanceMetric),
}

impl MetricSelection {
    /// Resolve the selection against a concrete set of points.
    pub fn resolve(&self, points: &[Position]) -> DistanceMetric {
        match self {
            MetricSelection::Auto => DistanceMetric::classify(points),
            MetricSelection::Fixed(metric) => *metric,
        }
    }
}

impl DistanceMetric {
    /// Classify a coordinate set as geographic or planar.
    ///
    /// Returns [`DistanceMetric::Planar`] for an empty set or when any coordinate is
    /// outside lon/lat bounds.
    pub fn classify(points: &[Position]) -> Self {
        if points.is_empty() {
            return DistanceMetric::Planar;
        }

        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for p in points {
            if !(p.x.abs() <= 180.0 && p.y.abs() <= 90.0) {
                return DistanceMetric::Planar;
            }
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }

        if max_x - min_x < GEOGRAPHIC_MAX_SPAN && max_y - min_y < GEOGRAPHIC_MAX_SPAN {
            DistanceMetric::Geographic
        } else {
            DistanceMetric::Planar
        }
    }

    /// Distance between two positions under this metric.
    #[inline]
    pub fn distance(&self, a: &Position, b: &Position) -> f64 {
        match self {
            DistanceMetric::Planar => euclidean_distance(a, b),
            DistanceMetric::Geographic => haversine_distance(a, b),
        }
    }
}

/// Calculate the great-circle distance between two lon/lat positions.
///
/// Returns meters along the Earth's surface. The `z` component is ignored.
///
/// ```rust
/// use route_pacer::{Position, geo_utils};
///
/// let london = Position::new(-0.1278, 51.5074);
/// let paris = Position::new(2.3522, 48.8566);
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(a: &Position, b: &Position) -> f64 {
    Haversine::distance(Point::new(a.x, a.y), Point::new(b.x, b.y))
}

/// Straight-line distance in the plane. The `z` component is ignored.
#[inline]
pub fn euclidean_distance(a: &Position, b: &Position) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

// =============================================================================
// Interpolation and Projection
// =============================================================================

/// Linear interpolation from `a` (t = 0) to `b` (t = 1).
#[inline]
pub fn lerp_position(a: &Position, b: &Position, t: f64) -> Position {
    Position {
        x: a.x + (b.x - a.x) * t,
        y: a.y + (b.y - a.y) * t,
        z: match (a.z, b.z) {
            (Some(za), Some(zb)) => Some(za + (zb - za) * t),
            (za, zb) => za.or(zb),
        },
    }
}

/// Linear interpolation of a scalar.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Project `query` onto the segment `a`-`b`.
///
/// Returns the clamped segment parameter `t` in `[0, 1]`. For geographic
/// coordinates the projection happens in a local equirectangular frame centered on
/// the segment, which is accurate at athletic-route scales. Zero-length segments
/// return 0.
pub fn project_onto_segment(metric: DistanceMetric, a: &Position, b: &Position, query: &Position) -> f64 {
    let x_scale = match metric {
        DistanceMetric::Planar => 1.0,
        DistanceMetric::Geographic => ((a.y + b.y) / 2.0).to_radians().cos(),
    };

    let dx = (b.x - a.x) * x_scale;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= 0.0 {
        return 0.0;
    }

    let qx = (query.x - a.x) * x_scale;
    let qy = query.y - a.y;
    ((qx * dx + qy * dy) / len_sq).clamp(0.0, 1.0)
}

// =============================================================================
// Unit Tests
// =============================================================================

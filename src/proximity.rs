//! Radius tests and nearest-candidate search.
//!
//! Shares the owning path's [`DistanceMetric`] so "within 25" means the same thing
//! for checkpoints, the path index and ghost comparison.

use crate::geo_utils::DistanceMetric;
use crate::Position;

/// Proximity helper bound to one distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityDetector {
    metric: DistanceMetric,
}

impl ProximityDetector {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Distance between two positions.
    #[inline]
    pub fn distance(&self, a: &Position, b: &Position) -> f64 {
        self.metric.distance(a, b)
    }

    /// True if `a` lies within `radius` of `b` (inclusive). Non-finite input is never within.
    pub fn within(&self, a: &Position, b: &Position, radius: f64) -> bool {
        let d = self.distance(a, b);
        d.is_finite() && d <= radius
    }

    /// Closest candidate to `query`. Ties keep the first candidate in iteration order.
    ///
    /// Returns `None` when there are no candidates or no finite distance.
    pub fn nearest_of<'a, I, K>(&self, query: &Position, candidates: I) -> Option<(K, f64)>
    where
        I: IntoIterator<Item = (K, &'a Position)>,
    {
        let mut best: Option<(K, f64)> = None;
        for (id, pos) in candidates {
            let d = self.distance(query, pos);
            if !d.is_finite() {
                continue;
            }
            match &best {
                Some((_, best_d)) if *best_d <= d => {}
                _ => best = Some((id, d)),
            }
        }
        best
    }
}

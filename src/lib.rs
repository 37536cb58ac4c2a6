//! # Route Pacer
//!
//! Live progress tracking along a predefined route, with checkpoint and segment
//! timing and a time-synchronized "ghost" replay of a previous recording.
//!
//! This library provides:
//! - A cumulative-distance index over route polylines (planar or geographic)
//! - Checkpoint detection with lap/split timing and reference deltas
//! - Progress-range segments with enter/exit events
//! - Ghost replay at variable speed with live-vs-recorded comparison
//!
//! ## Features
//!
//! - **`parallel`** - Parallel exhaustive nearest-point search with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use route_pacer::{
//!     CheckpointDescriptor, LiveSample, Position, RouteDefinition, TrackingConfig,
//!     TrackingEvent, TrackingSession,
//! };
//!
//! let route = RouteDefinition {
//!     points: vec![Position::new(0.0, 0.0), Position::new(0.0, 1000.0)],
//!     checkpoints: vec![CheckpointDescriptor {
//!         id: Some("halfway".to_string()),
//!         name: "Halfway".to_string(),
//!         target_distance: Some(500.0),
//!         radius: Some(20.0),
//!         ..Default::default()
//!     }],
//!     segments: vec![],
//! };
//!
//! let mut session = TrackingSession::new(route, TrackingConfig::default()).unwrap();
//! session.process_sample(&LiveSample::new(Position::new(0.0, 0.0), 0)).unwrap();
//! session.process_sample(&LiveSample::new(Position::new(0.0, 250.0), 60_000)).unwrap();
//! let outcome = session.process_sample(&LiveSample::new(Position::new(0.0, 505.0), 120_000)).unwrap();
//!
//! assert!(matches!(
//!     &outcome.events[0],
//!     TrackingEvent::CheckpointCompleted { checkpoint_id, .. } if checkpoint_id == "halfway"
//! ));
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Result, TrackingError};

// Distance metrics and interpolation helpers
pub mod geo_utils;
pub use geo_utils::{DistanceMetric, MetricSelection};

pub mod path_index;
pub use path_index::{NearestPoint, PathIndex, PathProjection, CLOSE_ENOUGH_DEFAULT};

pub mod proximity;
pub use proximity::ProximityDetector;

pub mod timing;
pub use timing::{DurationMs, Split, TimestampMs, TimingInfo, TimingSession};

pub mod checkpoints;
pub use checkpoints::{
    Checkpoint, CheckpointCategory, CheckpointConfig, CheckpointDescriptor, CheckpointState,
    CheckpointStats, CheckpointTracker, CheckpointUpdate,
};

pub mod segments;
pub use segments::{Segment, SegmentDescriptor, SegmentEvent, SegmentState, SegmentTracker};

// Ghost replay of a recorded session
pub mod replay;
pub use replay::{
    GhostComparison, RawTelemetrySample, ReplayConfig, ReplayEngine, ReplayFinished,
    ReplayRecording, ReplaySample, ReplayState, ReplayTick, TimePoint,
};

pub mod session;
pub use session::{
    LiveSample, RouteDefinition, SampleOutcome, SessionSnapshot, SessionStats, TrackingEvent,
    TrackingSession,
};

// ============================================================================
// Core Types
// ============================================================================

/// A 2D position with optional altitude.
///
/// For geographic routes `x` is longitude and `y` latitude, in degrees. For planar
/// routes both are in the route's own units (meters for the bundled tests).
///
/// # Example
/// ```
/// use route_pacer::Position;
/// let p = Position::with_altitude(-0.1278, 51.5074, 35.0);
/// assert!(p.is_finite());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_altitude(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// True if `x`, `y` and any altitude are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f64::is_finite)
    }
}

/// Configuration for a tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// How the route's distance metric is chosen.
    /// Default: classify from the route's coordinates
    pub metric: MetricSelection,

    /// Early-exit tolerance for nearest-vertex scans, in route units.
    /// Default: 1.0
    pub close_enough: f64,

    /// Checkpoint radius and motion threshold.
    pub checkpoint: CheckpointConfig,

    /// Replay timing synthesis and speed limits.
    pub replay: ReplayConfig,

    /// When set, live samples are projected only onto route segments within this
    /// along-path distance of the previous sample (falling back to the whole route).
    /// Keeps out-and-back and looped routes from snapping to the wrong leg.
    /// Default: None (whole route)
    pub progress_window: Option<f64>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            metric: MetricSelection::Auto,
            close_enough: CLOSE_ENOUGH_DEFAULT,
            checkpoint: CheckpointConfig::default(),
            replay: ReplayConfig::default(),
            progress_window: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

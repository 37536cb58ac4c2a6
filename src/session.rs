//! # Tracking Session
//!
//! Owns everything loaded for one route: the path index, the checkpoint and
//! segment trackers, the optional ghost replay and the configuration. A single
//! driving loop calls [`TrackingSession::process_sample`] per live sample and
//! [`TrackingSession::tick_replay`] per playback tick; both return plain events for
//! the presentation layer.
//!
//! Per sample, progress is computed once and fed to both trackers, checkpoints
//! first. A rejected sample changes nothing.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoints::{CheckpointDescriptor, CheckpointState, CheckpointStats, CheckpointTracker};
use crate::error::{Result, TrackingError};
use crate::path_index::{PathIndex, PathProjection};
use crate::replay::{
    GhostComparison, RawTelemetrySample, ReplayEngine, ReplayFinished, ReplaySample, ReplayState,
};
use crate::segments::{SegmentDescriptor, SegmentEvent, SegmentState, SegmentTracker};
use crate::timing::{DurationMs, TimestampMs, TimingInfo, TimingSession};
use crate::{Position, TrackingConfig};

/// Everything the route loader hands over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub points: Vec<Position>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointDescriptor>,
    #[serde(default)]
    pub segments: Vec<SegmentDescriptor>,
}

/// One live position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveSample {
    pub position: Position,
    pub timestamp_ms: TimestampMs,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl LiveSample {
    pub fn new(position: Position, timestamp_ms: TimestampMs) -> Self {
        Self { position, timestamp_ms, speed: None }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// Discrete output for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    CheckpointCompleted {
        checkpoint_id: String,
        total_time: DurationMs,
        split_time: DurationMs,
        delta: Option<DurationMs>,
    },
    SegmentEntered {
        segment_id: String,
        time: TimestampMs,
    },
    SegmentExited {
        segment_id: String,
        duration: DurationMs,
        delta: Option<DurationMs>,
    },
    ReplaySample(ReplaySample),
    ReplayFinished(ReplayFinished),
}

impl From<SegmentEvent> for TrackingEvent {
    fn from(event: SegmentEvent) -> Self {
        match event {
            SegmentEvent::Entered { segment_id, time } => TrackingEvent::SegmentEntered { segment_id, time },
            SegmentEvent::Exited { segment_id, duration, delta } => {
                TrackingEvent::SegmentExited { segment_id, duration, delta }
            }
        }
    }
}

/// Result of one live sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub events: Vec<TrackingEvent>,
    pub projection: PathProjection,
    pub active_checkpoint: Option<String>,
    pub distance_to_next: Option<f64>,
    /// Present when a recording is loaded and timing runs
    pub ghost: Option<GhostComparison>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub checkpoints: CheckpointStats,
    pub segments_total: usize,
    pub segments_active: usize,
    pub segments_completed: usize,
    pub route_distance: f64,
    pub distance_covered: Option<f64>,
}

/// Serializable snapshot of all runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub checkpoints: Vec<CheckpointState>,
    pub segments: Vec<SegmentState>,
    pub timing: TimingSession,
    pub last_distance: Option<f64>,
    pub replay: Option<ReplayState>,
}

/// Route-scoped tracking context.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    path: PathIndex,
    checkpoints: CheckpointTracker,
    segments: SegmentTracker,
    replay: Option<ReplayEngine>,
    config: TrackingConfig,
    last_distance: Option<f64>,
}

impl TrackingSession {
    /// Build the path index and both trackers.
    pub fn new(route: RouteDefinition, config: TrackingConfig) -> Result<Self> {
        let path = PathIndex::build_with(route.points, config.metric, config.close_enough)?;
        let checkpoints = CheckpointTracker::load(&route.checkpoints, &path, config.checkpoint.clone())?;
        let segments = SegmentTracker::load(&route.segments, &path)?;

        info!(
            "[Session] Route ready: {} points, {} checkpoints, {} segments",
            path.len(),
            checkpoints.checkpoints().len(),
            segments.segments().len()
        );

        Ok(Self {
            path,
            checkpoints,
            segments,
            replay: None,
            config,
            last_distance: None,
        })
    }

    /// Load a ghost recording, replacing any previous one only on success.
    pub fn load_replay(&mut self, samples: Vec<RawTelemetrySample>) -> Result<()> {
        let engine = ReplayEngine::from_samples(samples, self.config.replay.clone(), self.path.metric())?;
        self.replay = Some(engine);
        Ok(())
    }

    pub fn clear_replay(&mut self) {
        self.replay = None;
    }

    pub fn path(&self) -> &PathIndex {
        &self.path
    }

    pub fn checkpoints(&self) -> &CheckpointTracker {
        &self.checkpoints
    }

    pub fn segments(&self) -> &SegmentTracker {
        &self.segments
    }

    pub fn replay(&self) -> Option<&ReplayEngine> {
        self.replay.as_ref()
    }

    /// Playback control (play, pause, seek).
    pub fn replay_mut(&mut self) -> Option<&mut ReplayEngine> {
        self.replay.as_mut()
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Feed one live sample.
    ///
    /// Non-finite samples are logged and rejected with
    /// [`TrackingError::NonFiniteSample`]; no tracker state changes in that case.
    pub fn process_sample(&mut self, sample: &LiveSample) -> Result<SampleOutcome> {
        match self.try_process(sample) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("[Session] Discarded sample at {}: {}", sample.timestamp_ms, e);
                Err(e)
            }
        }
    }

    fn try_process(&mut self, sample: &LiveSample) -> Result<SampleOutcome> {
        if !sample.position.is_finite() {
            return Err(TrackingError::NonFiniteSample("live position"));
        }
        if sample.speed.is_some_and(|s| !s.is_finite()) {
            return Err(TrackingError::NonFiniteSample("live speed"));
        }

        let projection = self
            .project_live(&sample.position)
            .ok_or(TrackingError::NonFiniteSample("live projection"))?;

        let cp_update = self
            .checkpoints
            .update(&sample.position, sample.timestamp_ms, sample.speed)?;
        let seg_events = self.segments.update(projection.progress, sample.timestamp_ms)?;
        self.last_distance = Some(projection.along_distance);

        let mut events: Vec<TrackingEvent> = cp_update
            .completed_this_tick
            .iter()
            .map(|cp| TrackingEvent::CheckpointCompleted {
                checkpoint_id: cp.id.clone(),
                total_time: cp.total_time.unwrap_or(0),
                split_time: cp.split_time.unwrap_or(0),
                delta: cp.delta_from_reference,
            })
            .collect();
        events.extend(seg_events.into_iter().map(TrackingEvent::from));

        let timing = self.checkpoints.timing();
        let ghost = match (&self.replay, timing.is_running()) {
            (Some(replay), true) => {
                let live_time = timing.elapsed(sample.timestamp_ms) as f64 / 1000.0;
                replay.compare_against(projection.along_distance, live_time)
            }
            _ => None,
        };

        if !events.is_empty() {
            debug!("[Session] {} events at {}", events.len(), sample.timestamp_ms);
        }

        Ok(SampleOutcome {
            events,
            projection,
            active_checkpoint: cp_update.active.map(|c| c.id),
            distance_to_next: self.checkpoints.distance_to_next(projection.along_distance),
            ghost,
        })
    }

    /// Project onto the route, preferring the window around the last known distance.
    fn project_live(&self, position: &Position) -> Option<PathProjection> {
        match (self.config.progress_window, self.last_distance) {
            (Some(window), Some(last)) => self
                .path
                .project_near(position, last, window)
                .or_else(|| self.path.project(position)),
            _ => self.path.project(position),
        }
    }

    /// Advance the ghost by `delta_wall_time` seconds.
    pub fn tick_replay(&mut self, delta_wall_time: f64) -> Result<Vec<TrackingEvent>> {
        let Some(replay) = self.replay.as_mut() else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        if let Some(tick) = replay.tick(delta_wall_time)? {
            events.push(TrackingEvent::ReplaySample(tick.sample));
            if let Some(finished) = tick.finished {
                events.push(TrackingEvent::ReplayFinished(finished));
            }
        }
        Ok(events)
    }

    /// Clear all runtime state. The route, checkpoints and recording stay loaded.
    pub fn reset(&mut self) {
        self.checkpoints.reset();
        self.segments.reset();
        if let Some(replay) = self.replay.as_mut() {
            replay.stop();
        }
        self.last_distance = None;
        info!("[Session] Reset");
    }

    pub fn get_stats(&self) -> SessionStats {
        SessionStats {
            checkpoints: self.checkpoints.stats(),
            segments_total: self.segments.segments().len(),
            segments_active: self.segments.active_segments().count(),
            segments_completed: self.segments.completed_segments().count(),
            route_distance: self.path.total_distance(),
            distance_covered: self.last_distance,
        }
    }

    pub fn get_timing_info(&self, now: TimestampMs) -> TimingInfo {
        self.checkpoints.timing().info(now)
    }

    pub fn export_state(&self) -> SessionSnapshot {
        SessionSnapshot {
            checkpoints: self.checkpoints.export_states(),
            segments: self.segments.export_states(),
            timing: self.checkpoints.timing().clone(),
            last_distance: self.last_distance,
            replay: self.replay.as_ref().map(|r| r.state()),
        }
    }

    pub fn export_state_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.export_state())
    }

    /// Restore a snapshot taken on the same route. Nothing changes if any id is unknown.
    pub fn restore_state(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut checkpoints = self.checkpoints.clone();
        let mut segments = self.segments.clone();
        checkpoints.restore(&snapshot.checkpoints, snapshot.timing.clone())?;
        segments.restore(&snapshot.segments)?;

        self.checkpoints = checkpoints;
        self.segments = segments;
        self.last_distance = snapshot.last_distance.filter(|d| d.is_finite());
        if let (Some(replay), Some(state)) = (self.replay.as_mut(), snapshot.replay) {
            replay.restore_state(state);
        }
        info!("[Session] Restored state");
        Ok(())
    }
}

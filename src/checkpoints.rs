//! # Checkpoint Tracking
//!
//! Named waypoints along a route, each with a detection radius. Every live sample
//! is tested against the pending checkpoints; an arrival completes the checkpoint
//! once, records a split and (when a reference time exists) a delta.
//!
//! Per checkpoint: `pending -> completed`, terminal until [`CheckpointTracker::reset`].
//! `active` is recomputed on every update as "nearest pending checkpoint to the live
//! position" and is only kept for change detection.
//!
//! Checkpoints are armed while the timing session runs. The session starts on the
//! first sample showing motion: displacement since the previous sample above the
//! threshold (start stamped with the previous sample's time), or reported speed above
//! the threshold (start stamped with this sample's time). A speed field stuck at zero
//! does not hide real displacement.

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::path_index::PathIndex;
use crate::proximity::ProximityDetector;
use crate::timing::{DurationMs, TimestampMs, TimingSession};
use crate::Position;

/// What a checkpoint marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointCategory {
    Start,
    Finish,
    #[default]
    Split,
    Lap,
    /// Completed by the athlete rather than by arrival
    Manual,
}

/// Checkpoint as handed over by the route loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    /// Stable id; defaults to `cp-<input index>`
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub target_position: Option<Position>,
    /// Precomputed along-route distance; skips projection when given
    #[serde(default)]
    pub target_distance: Option<f64>,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub category: CheckpointCategory,
    /// Target elapsed time from session start
    #[serde(default)]
    pub reference_time: Option<DurationMs>,
}

/// A loaded checkpoint with its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub target_distance: f64,
    pub target_progress: f64,
    pub radius: f64,
    pub category: CheckpointCategory,
    pub reference_time: Option<DurationMs>,

    pub completed: bool,
    pub completed_at: Option<TimestampMs>,
    pub active: bool,
    pub split_time: Option<DurationMs>,
    pub total_time: Option<DurationMs>,
    pub delta_from_reference: Option<DurationMs>,
}

impl Checkpoint {
    /// Reset runtime state, keeping identity and target.
    pub fn clear(&mut self) {
        self.completed = false;
        self.completed_at = None;
        self.active = false;
        self.split_time = None;
        self.total_time = None;
        self.delta_from_reference = None;
    }

    fn complete(&mut self, timestamp: TimestampMs, split: DurationMs, total: DurationMs) {
        // Late samples never produce negative totals
        let total = total.max(0);
        self.completed = true;
        self.completed_at = Some(timestamp);
        self.active = false;
        self.split_time = Some(split);
        self.total_time = Some(total);
        self.delta_from_reference = self.reference_time.map(|r| total - r);
    }
}

/// Persistable runtime state of one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub id: String,
    pub completed: bool,
    pub completed_at: Option<TimestampMs>,
    pub split_time: Option<DurationMs>,
    pub total_time: Option<DurationMs>,
    pub delta_from_reference: Option<DurationMs>,
}

/// Outcome of one live sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointUpdate {
    pub completed_this_tick: Vec<Checkpoint>,
    pub active: Option<Checkpoint>,
    /// True when the active checkpoint differs from the previous update
    pub active_changed: bool,
    /// True when this sample started the timing session
    pub session_started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    /// 0..1
    pub completion_rate: f64,
}

/// Tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Radius for descriptors without one. Default: 25.0
    pub default_radius: f64,
    /// Speed or per-sample displacement that counts as motion. Default: 0.0
    pub motion_threshold: f64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            default_radius: 25.0,
            motion_threshold: 0.0,
        }
    }
}

/// Stateful tracker of a route's checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    checkpoints: Vec<Checkpoint>,
    timing: TimingSession,
    proximity: ProximityDetector,
    config: CheckpointConfig,
    last_sample: Option<(Position, TimestampMs)>,
    active_index: Option<usize>,
}

impl CheckpointTracker {
    /// Resolve descriptors against `path` and sort them by target distance.
    ///
    /// Fails with [`TrackingError::InvalidCheckpoint`] when a descriptor has no usable
    /// target, a non-finite target, a bad radius, or a duplicate id.
    pub fn load(descriptors: &[CheckpointDescriptor], path: &PathIndex, config: CheckpointConfig) -> Result<Self> {
        let mut checkpoints = Vec::with_capacity(descriptors.len());
        let mut seen = HashSet::new();

        for (i, desc) in descriptors.iter().enumerate() {
            let cp = resolve_descriptor(i, desc, path, &config)?;
            if !seen.insert(cp.id.clone()) {
                return Err(TrackingError::invalid_checkpoint(&cp.id, "duplicate id"));
            }
            checkpoints.push(cp);
        }

        checkpoints.sort_by(|a, b| a.target_distance.total_cmp(&b.target_distance));

        info!(
            "[CheckpointTracker] Loaded {} checkpoints over {:.1} units",
            checkpoints.len(),
            path.total_distance()
        );

        Ok(Self {
            checkpoints,
            timing: TimingSession::new(),
            proximity: ProximityDetector::new(path.metric()),
            config,
            last_sample: None,
            active_index: None,
        })
    }

    /// Checkpoints in ascending target distance.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn get(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    pub fn timing(&self) -> &TimingSession {
        &self.timing
    }

    pub fn active(&self) -> Option<&Checkpoint> {
        self.active_index.map(|i| &self.checkpoints[i])
    }

    /// Consume one live sample.
    ///
    /// Non-finite input is rejected with [`TrackingError::NonFiniteSample`] before any
    /// state changes.
    pub fn update(
        &mut self,
        live: &Position,
        timestamp: TimestampMs,
        speed: Option<f64>,
    ) -> Result<CheckpointUpdate> {
        if !live.is_finite() {
            return Err(TrackingError::NonFiniteSample("checkpoint position"));
        }
        if speed.is_some_and(|s| !s.is_finite()) {
            return Err(TrackingError::NonFiniteSample("checkpoint speed"));
        }

        let mut update = CheckpointUpdate::default();

        if !self.timing.is_running() {
            if let Some(start) = self.motion_start(live, timestamp, speed) {
                self.timing.start(start);
                update.session_started = true;
                info!("[CheckpointTracker] Timing session started at {}", start);
            }
        }
        self.last_sample = Some((*live, timestamp));

        if let Some(start) = self.timing.start_time() {
            for i in 0..self.checkpoints.len() {
                if self.checkpoints[i].completed {
                    continue;
                }
                if !self.proximity.within(live, &self.checkpoints[i].position, self.checkpoints[i].radius) {
                    continue;
                }
                let split = self.timing.record_split(timestamp).unwrap_or(0);
                let cp = &mut self.checkpoints[i];
                cp.complete(timestamp, split, timestamp - start);
                debug!(
                    "[CheckpointTracker] Completed '{}' at {} (split {} ms)",
                    cp.id, timestamp, split
                );
                update.completed_this_tick.push(cp.clone());
            }
        }

        let new_active = self.nearest_pending(live);
        update.active_changed = new_active != self.active_index;
        self.set_active(new_active);
        update.active = self.active().cloned();

        Ok(update)
    }

    /// Complete a checkpoint by hand (e.g. a `Manual` checkpoint).
    ///
    /// Starts the session at `timestamp` if it is not running. Returns `None` if the
    /// checkpoint was already completed.
    pub fn manual_complete(&mut self, id: &str, timestamp: TimestampMs) -> Result<Option<Checkpoint>> {
        let idx = self
            .checkpoints
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| TrackingError::UnknownId(id.to_string()))?;

        if self.checkpoints[idx].completed {
            return Ok(None);
        }

        self.timing.start(timestamp);
        let start = self.timing.start_time().unwrap_or(timestamp);
        let split = self.timing.record_split(timestamp).unwrap_or(0);
        self.checkpoints[idx].complete(timestamp, split, timestamp - start);

        if self.active_index == Some(idx) {
            self.set_active(None);
        }

        info!("[CheckpointTracker] Manually completed '{}'", id);
        Ok(Some(self.checkpoints[idx].clone()))
    }

    /// Along-route distance from `along_distance` to the next pending checkpoint ahead.
    pub fn distance_to_next(&self, along_distance: f64) -> Option<f64> {
        self.checkpoints
            .iter()
            .find(|c| !c.completed && c.target_distance >= along_distance)
            .map(|c| c.target_distance - along_distance)
    }

    /// Clear completion state and timing. Identities and targets survive.
    pub fn reset(&mut self) {
        for cp in &mut self.checkpoints {
            cp.clear();
        }
        self.timing.reset();
        self.last_sample = None;
        self.active_index = None;
        info!("[CheckpointTracker] Reset {} checkpoints", self.checkpoints.len());
    }

    pub fn stats(&self) -> CheckpointStats {
        let total = self.checkpoints.len();
        let completed = self.checkpoints.iter().filter(|c| c.completed).count();
        CheckpointStats {
            total,
            completed,
            remaining: total - completed,
            completion_rate: if total == 0 { 0.0 } else { completed as f64 / total as f64 },
        }
    }

    pub fn export_states(&self) -> Vec<CheckpointState> {
        self.checkpoints
            .iter()
            .map(|c| CheckpointState {
                id: c.id.clone(),
                completed: c.completed,
                completed_at: c.completed_at,
                split_time: c.split_time,
                total_time: c.total_time,
                delta_from_reference: c.delta_from_reference,
            })
            .collect()
    }

    /// Restore runtime state from a snapshot. Every id is checked before anything
    /// changes; checkpoints absent from the snapshot are cleared.
    pub fn restore(&mut self, states: &[CheckpointState], timing: TimingSession) -> Result<()> {
        let mut indices = Vec::with_capacity(states.len());
        for state in states {
            let idx = self
                .checkpoints
                .iter()
                .position(|c| c.id == state.id)
                .ok_or_else(|| TrackingError::UnknownId(state.id.clone()))?;
            indices.push(idx);
        }

        for cp in &mut self.checkpoints {
            cp.clear();
        }
        for (state, idx) in states.iter().zip(indices) {
            let cp = &mut self.checkpoints[idx];
            cp.completed = state.completed;
            cp.completed_at = state.completed_at;
            cp.split_time = state.split_time;
            cp.total_time = state.total_time;
            cp.delta_from_reference = state.delta_from_reference;
        }

        self.timing = timing;
        self.last_sample = None;
        self.active_index = None;
        Ok(())
    }

    fn motion_start(&self, live: &Position, timestamp: TimestampMs, speed: Option<f64>) -> Option<TimestampMs> {
        let threshold = self.config.motion_threshold;
        let displaced = self.last_sample.and_then(|(prev, prev_ts)| {
            (self.proximity.distance(&prev, live) > threshold).then_some(prev_ts)
        });
        let moving = speed.and_then(|s| (s > threshold).then_some(timestamp));
        displaced.or(moving)
    }

    fn nearest_pending(&self, live: &Position) -> Option<usize> {
        let pending = self
            .checkpoints
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.completed)
            .map(|(i, c)| (i, &c.position));
        self.proximity.nearest_of(live, pending).map(|(i, _)| i)
    }

    fn set_active(&mut self, idx: Option<usize>) {
        if let Some(old) = self.active_index {
            self.checkpoints[old].active = false;
        }
        if let Some(new) = idx {
            self.checkpoints[new].active = true;
        }
        self.active_index = idx;
    }
}

fn resolve_descriptor(
    index: usize,
    desc: &CheckpointDescriptor,
    path: &PathIndex,
    config: &CheckpointConfig,
) -> Result<Checkpoint> {
    let id = desc.id.clone().unwrap_or_else(|| format!("cp-{}", index));

    let radius = desc.radius.unwrap_or(config.default_radius);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(TrackingError::invalid_checkpoint(&id, format!("bad radius {}", radius)));
    }

    let (position, target_distance) = match (desc.target_position, desc.target_distance) {
        (Some(pos), _) if !pos.is_finite() => {
            return Err(TrackingError::invalid_checkpoint(&id, "non-finite target position"));
        }
        (_, Some(d)) if !d.is_finite() => {
            return Err(TrackingError::invalid_checkpoint(&id, "non-finite target distance"));
        }
        (Some(pos), Some(d)) => (pos, d.clamp(0.0, path.total_distance())),
        (Some(pos), None) => {
            let proj = path
                .project(&pos)
                .ok_or_else(|| TrackingError::invalid_checkpoint(&id, "cannot project onto path"))?;
            (pos, proj.along_distance)
        }
        (None, Some(d)) => {
            let d = d.clamp(0.0, path.total_distance());
            (path.point_at_distance(d), d)
        }
        (None, None) => {
            return Err(TrackingError::invalid_checkpoint(&id, "no target position or distance"));
        }
    };

    Ok(Checkpoint {
        id,
        name: desc.name.clone(),
        position,
        target_distance,
        target_progress: path.progress_at_distance(target_distance),
        radius,
        category: desc.category,
        reference_time: desc.reference_time,
        completed: false,
        completed_at: None,
        active: false,
        split_time: None,
        total_time: None,
        delta_from_reference: None,
    })
}

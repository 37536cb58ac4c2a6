//! Bounded route sections tracked for entry, exit and duration.
//!
//! Per segment: `inactive -> active -> completed`. A segment activates when progress
//! enters `[start, end)` and completes when progress leaves the interval in either
//! direction. Completed is terminal until [`SegmentTracker::reset`]. Segments are
//! independent, so several may be active at once.

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::path_index::PathIndex;
use crate::timing::{DurationMs, TimestampMs};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Stable id; defaults to `seg-<input index>`
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub start_progress: f64,
    pub end_progress: f64,
    /// Target duration for the section
    #[serde(default)]
    pub reference_duration: Option<DurationMs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub start_progress: f64,
    pub end_progress: f64,
    pub start_distance: f64,
    pub end_distance: f64,
    pub reference_duration: Option<DurationMs>,

    pub is_active: bool,
    pub is_completed: bool,
    pub enter_time: Option<TimestampMs>,
    pub exit_time: Option<TimestampMs>,
    pub current_duration: Option<DurationMs>,
}

impl Segment {
    /// True if `progress` lies in `[start, end)`.
    pub fn contains(&self, progress: f64) -> bool {
        progress >= self.start_progress && progress < self.end_progress
    }

    fn clear(&mut self) {
        self.is_active = false;
        self.is_completed = false;
        self.enter_time = None;
        self.exit_time = None;
        self.current_duration = None;
    }
}

/// Transition emitted by [`SegmentTracker::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentEvent {
    Entered {
        segment_id: String,
        time: TimestampMs,
    },
    Exited {
        segment_id: String,
        duration: DurationMs,
        /// `duration - reference_duration` when a reference exists
        delta: Option<DurationMs>,
    },
}

/// Persistable runtime state of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentState {
    pub id: String,
    pub is_active: bool,
    pub is_completed: bool,
    pub enter_time: Option<TimestampMs>,
    pub exit_time: Option<TimestampMs>,
    pub current_duration: Option<DurationMs>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentTracker {
    segments: Vec<Segment>,
}

impl SegmentTracker {
    /// Resolve descriptors against `path`.
    ///
    /// Progress bounds must be finite, inside `[0, 1]`, with `start < end`.
    pub fn load(descriptors: &[SegmentDescriptor], path: &PathIndex) -> Result<Self> {
        let mut segments = Vec::with_capacity(descriptors.len());
        let mut seen = HashSet::new();

        for (i, desc) in descriptors.iter().enumerate() {
            let id = desc.id.clone().unwrap_or_else(|| format!("seg-{}", i));
            let (start, end) = (desc.start_progress, desc.end_progress);

            if !start.is_finite() || !end.is_finite() {
                return Err(TrackingError::invalid_segment(&id, "non-finite bounds"));
            }
            if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start >= end {
                return Err(TrackingError::invalid_segment(
                    &id,
                    format!("bounds [{}, {}) outside 0..1 or empty", start, end),
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(TrackingError::invalid_segment(&id, "duplicate id"));
            }

            segments.push(Segment {
                id,
                name: desc.name.clone(),
                start_progress: start,
                end_progress: end,
                start_distance: path.distance_at_progress(start),
                end_distance: path.distance_at_progress(end),
                reference_duration: desc.reference_duration,
                is_active: false,
                is_completed: false,
                enter_time: None,
                exit_time: None,
                current_duration: None,
            });
        }

        info!("[SegmentTracker] Loaded {} segments", segments.len());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn active_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_active)
    }

    pub fn completed_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_completed)
    }

    /// Advance every segment with the tick's progress value.
    pub fn update(&mut self, progress: f64, timestamp: TimestampMs) -> Result<Vec<SegmentEvent>> {
        if !progress.is_finite() {
            return Err(TrackingError::NonFiniteSample("segment progress"));
        }

        let mut events = Vec::new();
        for seg in &mut self.segments {
            if seg.is_completed {
                continue;
            }

            let inside = seg.contains(progress);
            match (seg.is_active, inside) {
                (false, true) => {
                    seg.is_active = true;
                    seg.enter_time = Some(timestamp);
                    seg.current_duration = Some(0);
                    debug!("[SegmentTracker] Entered '{}' at {}", seg.id, timestamp);
                    events.push(SegmentEvent::Entered {
                        segment_id: seg.id.clone(),
                        time: timestamp,
                    });
                }
                (true, true) => {
                    seg.current_duration = seg.enter_time.map(|t| (timestamp - t).max(0));
                }
                (true, false) => {
                    let duration = seg.enter_time.map_or(0, |t| (timestamp - t).max(0));
                    seg.is_active = false;
                    seg.is_completed = true;
                    seg.exit_time = Some(timestamp);
                    seg.current_duration = Some(duration);
                    debug!("[SegmentTracker] Exited '{}' after {} ms", seg.id, duration);
                    events.push(SegmentEvent::Exited {
                        segment_id: seg.id.clone(),
                        duration,
                        delta: seg.reference_duration.map(|r| duration - r),
                    });
                }
                (false, false) => {}
            }
        }

        Ok(events)
    }

    /// Return every segment to inactive.
    pub fn reset(&mut self) {
        for seg in &mut self.segments {
            seg.clear();
        }
    }

    pub fn export_states(&self) -> Vec<SegmentState> {
        self.segments
            .iter()
            .map(|s| SegmentState {
                id: s.id.clone(),
                is_active: s.is_active,
                is_completed: s.is_completed,
                enter_time: s.enter_time,
                exit_time: s.exit_time,
                current_duration: s.current_duration,
            })
            .collect()
    }

    /// Restore runtime state. All ids are validated before anything changes.
    pub fn restore(&mut self, states: &[SegmentState]) -> Result<()> {
        let mut indices = Vec::with_capacity(states.len());
        for state in states {
            let idx = self
                .segments
                .iter()
                .position(|s| s.id == state.id)
                .ok_or_else(|| TrackingError::UnknownId(state.id.clone()))?;
            indices.push(idx);
        }

        self.reset();
        for (state, idx) in states.iter().zip(indices) {
            let seg = &mut self.segments[idx];
            seg.is_active = state.is_active;
            seg.is_completed = state.is_completed;
            seg.enter_time = state.enter_time;
            seg.exit_time = state.exit_time;
            seg.current_duration = state.current_duration;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;

    fn path() -> PathIndex {
        PathIndex::build(vec![Position::new(0.0, 0.0), Position::new(0.0, 1000.0)]).unwrap()
    }

    fn seg(id: &str, start: f64, end: f64) -> SegmentDescriptor {
        SegmentDescriptor {
            id: Some(id.to_string()),
            name: id.to_string(),
            start_progress: start,
            end_progress: end,
            reference_duration: None,
        }
    }

    #[test]
    fn test_enter_and_exit_sequence() {
        let mut tracker = SegmentTracker::load(&[seg("climb", 0.2, 0.4)], &path()).unwrap();
        assert_eq!(tracker.segments()[0].start_distance, 200.0);
        assert_eq!(tracker.segments()[0].end_distance, 400.0);

        assert!(tracker.update(0.1, 1_000).unwrap().is_empty());

        let entered = tracker.update(0.25, 2_000).unwrap();
        assert_eq!(
            entered,
            vec![SegmentEvent::Entered { segment_id: "climb".to_string(), time: 2_000 }]
        );

        assert!(tracker.update(0.35, 3_500).unwrap().is_empty());
        assert_eq!(tracker.get("climb").unwrap().current_duration, Some(1_500));

        let exited = tracker.update(0.5, 7_000).unwrap();
        assert_eq!(
            exited,
            vec![SegmentEvent::Exited { segment_id: "climb".to_string(), duration: 5_000, delta: None }]
        );

        let s = tracker.get("climb").unwrap();
        assert!(s.is_completed);
        assert!(!s.is_active);
        assert_eq!(s.current_duration, Some(5_000));
    }

    #[test]
    fn test_no_reentry_until_reset() {
        let mut tracker = SegmentTracker::load(&[seg("s", 0.2, 0.4)], &path()).unwrap();
        tracker.update(0.3, 0).unwrap();
        tracker.update(0.5, 1_000).unwrap();

        assert!(tracker.update(0.3, 2_000).unwrap().is_empty());
        assert!(tracker.update(0.1, 3_000).unwrap().is_empty());

        tracker.reset();
        let events = tracker.update(0.3, 4_000).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_exit_backwards_completes() {
        let mut tracker = SegmentTracker::load(&[seg("s", 0.2, 0.4)], &path()).unwrap();
        tracker.update(0.3, 0).unwrap();
        let events = tracker.update(0.1, 2_000).unwrap();
        assert!(matches!(events[0], SegmentEvent::Exited { duration: 2_000, .. }));
    }

    #[test]
    fn test_overlapping_segments_independent() {
        let mut descs = vec![seg("a", 0.1, 0.5), seg("b", 0.3, 0.7)];
        descs[1].reference_duration = Some(3_000);
        let mut tracker = SegmentTracker::load(&descs, &path()).unwrap();

        tracker.update(0.2, 0).unwrap();
        tracker.update(0.4, 1_000).unwrap();
        assert_eq!(tracker.active_segments().count(), 2);

        let events = tracker.update(0.6, 2_000).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SegmentEvent::Exited { segment_id, .. } if segment_id == "a"));

        let events = tracker.update(0.8, 5_000).unwrap();
        assert_eq!(
            events[0],
            SegmentEvent::Exited { segment_id: "b".to_string(), duration: 4_000, delta: Some(1_000) }
        );
        assert_eq!(tracker.completed_segments().count(), 2);
    }

    #[test]
    fn test_load_validation() {
        assert!(SegmentTracker::load(&[seg("x", 0.5, 0.5)], &path()).is_err());
        assert!(SegmentTracker::load(&[seg("x", -0.1, 0.5)], &path()).is_err());
        assert!(SegmentTracker::load(&[seg("x", 0.1, f64::NAN)], &path()).is_err());
        assert!(SegmentTracker::load(&[seg("x", 0.1, 0.2), seg("x", 0.3, 0.4)], &path()).is_err());
    }

    #[test]
    fn test_non_finite_progress_rejected() {
        let mut tracker = SegmentTracker::load(&[seg("s", 0.0, 0.4)], &path()).unwrap();
        tracker.update(0.1, 0).unwrap();
        let before = tracker.export_states();
        assert!(tracker.update(f64::NAN, 1_000).is_err());
        assert_eq!(tracker.export_states(), before);
    }

    #[test]
    fn test_restore() {
        let mut tracker = SegmentTracker::load(&[seg("s", 0.2, 0.4)], &path()).unwrap();
        tracker.update(0.3, 0).unwrap();
        let states = tracker.export_states();

        let mut fresh = SegmentTracker::load(&[seg("s", 0.2, 0.4)], &path()).unwrap();
        fresh.restore(&states).unwrap();
        assert!(fresh.get("s").unwrap().is_active);

        let events = fresh.update(0.6, 1_500).unwrap();
        assert!(matches!(events[0], SegmentEvent::Exited { duration: 1_500, .. }));
    }
}

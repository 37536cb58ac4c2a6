//! Start/split timing shared by the checkpoint and segment trackers.
//!
//! All times are integer milliseconds on the live feed's clock.

use serde::{Deserialize, Serialize};

/// Live-feed timestamp in milliseconds.
pub type TimestampMs = i64;

/// Duration in milliseconds. Signed so deltas against a reference can be negative.
pub type DurationMs = i64;

/// One recorded split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// 1-based split number
    pub number: u32,
    /// When the split was recorded
    pub at: TimestampMs,
    /// Time since the previous split (or since start)
    pub duration: DurationMs,
}

/// Monotonic start/split timer.
///
/// Invariant: `last_split_time >= start_time` whenever both are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSession {
    start_time: Option<TimestampMs>,
    last_split_time: Option<TimestampMs>,
    splits: Vec<Split>,
}

/// Snapshot of the timer for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub started_at: Option<TimestampMs>,
    pub last_split_at: Option<TimestampMs>,
    pub is_running: bool,
    pub elapsed: DurationMs,
    pub split_count: u32,
}

impl TimingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn start_time(&self) -> Option<TimestampMs> {
        self.start_time
    }

    pub fn last_split_time(&self) -> Option<TimestampMs> {
        self.last_split_time
    }

    /// Split history, oldest first.
    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    /// Start the session. A running session is left untouched.
    ///
    /// Returns true if this call started it.
    pub fn start(&mut self, timestamp: TimestampMs) -> bool {
        if self.start_time.is_some() {
            return false;
        }
        self.start_time = Some(timestamp);
        true
    }

    /// Record a split and return the time since the previous split (or since start).
    ///
    /// Returns `None` when the session is not running. Out-of-order timestamps yield a
    /// zero-length split rather than moving the split marker backwards.
    pub fn record_split(&mut self, timestamp: TimestampMs) -> Option<DurationMs> {
        let start = self.start_time?;
        let base = self.last_split_time.map_or(start, |last| last.max(start));
        let duration = (timestamp - base).max(0);

        self.last_split_time = Some(timestamp.max(base));
        self.splits.push(Split {
            number: self.splits.len() as u32 + 1,
            at: timestamp,
            duration,
        });

        Some(duration)
    }

    /// Time since start, or 0 if not started.
    pub fn elapsed(&self, now: TimestampMs) -> DurationMs {
        self.start_time.map_or(0, |start| (now - start).max(0))
    }

    /// Stop and clear.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn info(&self, now: TimestampMs) -> TimingInfo {
        TimingInfo {
            started_at: self.start_time,
            last_split_at: self.last_split_time,
            is_running: self.is_running(),
            elapsed: self.elapsed(now),
            split_count: self.splits.len() as u32,
        }
    }
}

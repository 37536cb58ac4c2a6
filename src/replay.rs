//! # Ghost Replay
//!
//! Turns a sparse, time-stamped telemetry recording into a function
//! `time -> (position, metrics)` and plays it back under its own virtual clock.
//!
//! ## Ingestion
//! Decoders hand over [`RawTelemetrySample`]s. Field-name variants found in the wild
//! (`hr`, `heartrate`, `watts`, `ele`, ...) are folded into one canonical shape by serde
//! aliases, then [`ReplayRecording::from_samples`]:
//! 1. Drops samples carrying non-finite values
//! 2. Keeps timed samples, sorted by time with duplicate timestamps removed
//! 3. Fills missing distances from positions (or carries the previous distance)
//! 4. Forces distances to be non-decreasing
//! 5. Without any timestamps, synthesizes `dt = dd / max(speed, eps)` clamped to a
//!    minimum step and flags the recording with `is_synthesized_timing`
//! 6. Shifts the time axis so the first point is at `t = 0`
//!
//! ## Playback
//! The virtual clock runs in recording seconds. `tick(dt)` advances it by
//! `dt * speed_multiplier`, samples by linear interpolation between the bracketing
//! points and stops playback once the end is reached.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};
use crate::geo_utils::{lerp, lerp_position, DistanceMetric};
use crate::Position;

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Floor for speed when synthesizing timing (units/s). Default: 0.1
    pub speed_epsilon: f64,
    /// Smallest synthesized time step (s). Default: 0.1
    pub min_time_step: f64,
    /// Upper bound for the playback multiplier. Default: 64.0
    pub max_speed_multiplier: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed_epsilon: 0.1,
            min_time_step: 0.1,
            max_speed_multiplier: 64.0,
        }
    }
}

/// One decoded telemetry record before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetrySample {
    #[serde(default, alias = "elapsed", alias = "t", alias = "timestamp", alias = "secs")]
    pub time: Option<f64>,
    #[serde(default, alias = "pos", alias = "point")]
    pub position: Option<Position>,
    #[serde(default, alias = "dist", alias = "distance_m")]
    pub distance: Option<f64>,
    #[serde(default, alias = "velocity", alias = "velocity_smooth", alias = "enhanced_speed")]
    pub speed: Option<f64>,
    #[serde(default, alias = "watts")]
    pub power: Option<f64>,
    #[serde(default, alias = "heartrate", alias = "hr", alias = "bpm")]
    pub heart_rate: Option<f64>,
    #[serde(default, alias = "rpm")]
    pub cadence: Option<f64>,
    #[serde(default, alias = "elevation", alias = "ele", alias = "enhanced_altitude")]
    pub altitude: Option<f64>,
}

impl RawTelemetrySample {
    fn is_finite(&self) -> bool {
        let finite = |v: Option<f64>| v.map_or(true, f64::is_finite);
        finite(self.time)
            && finite(self.distance)
            && finite(self.speed)
            && finite(self.power)
            && finite(self.heart_rate)
            && finite(self.cadence)
            && finite(self.altitude)
            && self.position.map_or(true, |p| p.is_finite())
    }
}

/// Canonical recording point. `time` is strictly increasing across a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: f64,
    pub position: Option<Position>,
    pub distance: f64,
    pub speed: f64,
    pub power: Option<f64>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub altitude: Option<f64>,
}

/// A validated recording.
///
/// Deserialized recordings go through [`ReplayRecording::from_time_points`], so
/// unordered or duplicate times are normalized the same way as decoded telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordingData")]
pub struct ReplayRecording {
    points: Vec<TimePoint>,
    synthesized_timing: bool,
}

/// Serialized shape of a [`ReplayRecording`].
#[derive(Deserialize)]
struct RecordingData {
    points: Vec<TimePoint>,
    #[serde(default)]
    synthesized_timing: bool,
}

impl TryFrom<RecordingData> for ReplayRecording {
    type Error = TrackingError;

    fn try_from(data: RecordingData) -> Result<Self> {
        // Every point carries a distance, so the metric is never consulted
        let mut recording =
            Self::from_time_points(data.points, &ReplayConfig::default(), DistanceMetric::Planar)?;
        recording.synthesized_timing = data.synthesized_timing;
        Ok(recording)
    }
}

impl ReplayRecording {
    /// Normalize raw samples into a recording. `metric` measures position deltas when
    /// distances are missing.
    pub fn from_samples(
        samples: Vec<RawTelemetrySample>,
        config: &ReplayConfig,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let input_len = samples.len();
        let finite: Vec<RawTelemetrySample> = samples.into_iter().filter(|s| s.is_finite()).collect();
        if finite.len() < input_len {
            warn!("[ReplayEngine] Dropped {} non-finite samples", input_len - finite.len());
        }

        let timed_count = finite.iter().filter(|s| s.time.is_some()).count();
        let synthesized_timing = timed_count == 0;

        let mut samples = finite;
        if !synthesized_timing {
            if timed_count < samples.len() {
                warn!(
                    "[ReplayEngine] Dropped {} samples without timestamps",
                    samples.len() - timed_count
                );
                samples.retain(|s| s.time.is_some());
            }
            samples.sort_by(|a, b| a.time.unwrap_or(0.0).total_cmp(&b.time.unwrap_or(0.0)));
            let before = samples.len();
            samples.dedup_by(|later, earlier| later.time == earlier.time);
            if samples.len() < before {
                debug!("[ReplayEngine] Removed {} duplicate timestamps", before - samples.len());
            }
        }

        if samples.is_empty() {
            return Err(TrackingError::EmptyRecording);
        }

        let distances = fill_distances(&samples, metric);
        let times = if synthesized_timing {
            warn!("[ReplayEngine] No timestamps, synthesizing timing from distance and speed");
            synthesize_times(&samples, &distances, config)
        } else {
            let t0 = samples[0].time.unwrap_or(0.0);
            samples.iter().map(|s| s.time.unwrap_or(t0) - t0).collect()
        };

        let mut points: Vec<TimePoint> = Vec::with_capacity(samples.len());
        for (i, s) in samples.iter().enumerate() {
            let speed = s.speed.unwrap_or_else(|| {
                if i == 0 {
                    0.0
                } else {
                    let dt = times[i] - times[i - 1];
                    if dt > 0.0 { (distances[i] - distances[i - 1]) / dt } else { 0.0 }
                }
            });
            points.push(TimePoint {
                time: times[i],
                position: s.position,
                distance: distances[i],
                speed,
                power: s.power,
                heart_rate: s.heart_rate,
                cadence: s.cadence,
                altitude: s.altitude.or(s.position.and_then(|p| p.z)),
            });
        }

        let recording = Self { points, synthesized_timing };
        info!(
            "[ReplayEngine] Recording: {} points, {:.1}s, {:.1} units{}",
            recording.len(),
            recording.total_duration(),
            recording.total_distance(),
            if synthesized_timing { " (synthesized timing)" } else { "" }
        );
        Ok(recording)
    }

    /// Build from canonical points, applying the same validation.
    pub fn from_time_points(points: Vec<TimePoint>, config: &ReplayConfig, metric: DistanceMetric) -> Result<Self> {
        let samples = points
            .into_iter()
            .map(|p| RawTelemetrySample {
                time: Some(p.time),
                position: p.position,
                distance: Some(p.distance),
                speed: Some(p.speed),
                power: p.power,
                heart_rate: p.heart_rate,
                cadence: p.cadence,
                altitude: p.altitude,
            })
            .collect();
        Self::from_samples(samples, config, metric)
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    /// Check the playback invariants: at least one point, finite strictly increasing
    /// times and finite non-decreasing distances.
    pub fn validate(&self) -> Result<()> {
        let first = self.points.first().ok_or(TrackingError::EmptyRecording)?;
        if !first.time.is_finite() || !first.distance.is_finite() {
            return Err(TrackingError::InvalidRecording("non-finite first point"));
        }
        for w in self.points.windows(2) {
            // Negated comparisons also catch NaN
            if !(w[1].time > w[0].time) || !w[1].time.is_finite() {
                return Err(TrackingError::InvalidRecording("times are not strictly increasing"));
            }
            if !(w[1].distance >= w[0].distance) || !w[1].distance.is_finite() {
                return Err(TrackingError::InvalidRecording("distances decrease"));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when the time axis was derived from distance and speed.
    pub fn is_synthesized_timing(&self) -> bool {
        self.synthesized_timing
    }

    pub fn total_duration(&self) -> f64 {
        self.points[self.points.len() - 1].time
    }

    pub fn total_distance(&self) -> f64 {
        self.points[self.points.len() - 1].distance
    }

    /// Interpolated sample at recording time `t`, clamped to the recording's range.
    pub fn sample_at(&self, t: f64) -> ReplaySample {
        let t = if t.is_nan() { 0.0 } else { t };
        let (a, b, tt) = self.bracket_time(t);
        let (pa, pb) = (&self.points[a], &self.points[b]);

        let position = match (pa.position, pb.position) {
            (Some(x), Some(y)) => Some(lerp_position(&x, &y, tt)),
            (x, y) => if tt < 0.5 { x.or(y) } else { y.or(x) },
        };

        ReplaySample {
            position,
            distance: lerp(pa.distance, pb.distance, tt),
            speed: lerp(pa.speed, pb.speed, tt),
            power: lerp_opt(pa.power, pb.power, tt),
            heart_rate: lerp_opt(pa.heart_rate, pb.heart_rate, tt),
            cadence: lerp_opt(pa.cadence, pb.cadence, tt),
            altitude: lerp_opt(pa.altitude, pb.altitude, tt),
            virtual_time: t.clamp(0.0, self.total_duration()),
        }
    }

    /// Recorded time at which the recording reached distance `d`.
    pub fn time_at_distance(&self, d: f64) -> f64 {
        let first = &self.points[0];
        let last = &self.points[self.points.len() - 1];
        if !(d > first.distance) {
            return first.time;
        }
        if d >= last.distance {
            // Earliest point at the final distance
            let idx = self.points.partition_point(|p| p.distance < last.distance);
            return self.points[idx].time;
        }

        let b = self.points.partition_point(|p| p.distance < d);
        let a = b - 1;
        let (pa, pb) = (&self.points[a], &self.points[b]);
        let span = pb.distance - pa.distance;
        if span <= 0.0 {
            return pa.time;
        }
        lerp(pa.time, pb.time, (d - pa.distance) / span)
    }

    /// Recorded distance at recording time `t`.
    pub fn distance_at_time(&self, t: f64) -> f64 {
        let (a, b, tt) = self.bracket_time(t);
        lerp(self.points[a].distance, self.points[b].distance, tt)
    }

    /// Fractional point index at recording time `t`.
    pub fn index_at_time(&self, t: f64) -> f64 {
        let (a, _, tt) = self.bracket_time(t);
        a as f64 + tt
    }

    /// Bracketing indices and the interpolation parameter for time `t`.
    fn bracket_time(&self, t: f64) -> (usize, usize, f64) {
        let last = self.points.len() - 1;
        if !(t > self.points[0].time) {
            return (0, 0, 0.0);
        }
        if t >= self.points[last].time {
            return (last, last, 0.0);
        }
        let b = self.points.partition_point(|p| p.time < t);
        let a = b - 1;
        let span = self.points[b].time - self.points[a].time;
        (a, b, (t - self.points[a].time) / span)
    }
}

fn lerp_opt(a: Option<f64>, b: Option<f64>, t: f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(lerp(x, y, t)),
        (x, y) => if t < 0.5 { x.or(y) } else { y.or(x) },
    }
}

/// Fill missing distances and force the sequence to be non-decreasing.
fn fill_distances(samples: &[RawTelemetrySample], metric: DistanceMetric) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(samples.len());
    let mut repaired = 0usize;

    for (i, s) in samples.iter().enumerate() {
        let prev = if i == 0 { 0.0 } else { out[i - 1] };
        let d = match s.distance {
            Some(d) => d,
            None if i == 0 => 0.0,
            None => match (samples[i - 1].position, s.position) {
                (Some(a), Some(b)) => prev + metric.distance(&a, &b),
                _ => prev,
            },
        };
        if i > 0 && d < prev {
            repaired += 1;
        }
        out.push(if i == 0 { d } else { d.max(prev) });
    }

    if repaired > 0 {
        warn!("[ReplayEngine] Clamped {} backwards distance samples", repaired);
    }
    out
}

/// Derive a time axis from distance and speed.
fn synthesize_times(samples: &[RawTelemetrySample], distances: &[f64], config: &ReplayConfig) -> Vec<f64> {
    let eps = config.speed_epsilon.max(f64::MIN_POSITIVE);
    let min_step = config.min_time_step.max(f64::MIN_POSITIVE);

    let mut times = Vec::with_capacity(samples.len());
    times.push(0.0);
    let mut last_speed: Option<f64> = samples[0].speed;

    for i in 1..samples.len() {
        let speed = match (samples[i - 1].speed, samples[i].speed) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            (a, b) => a.or(b).or(last_speed).unwrap_or(eps),
        };
        if samples[i].speed.is_some() {
            last_speed = samples[i].speed;
        }
        let dt = ((distances[i] - distances[i - 1]) / speed.max(eps)).max(min_step);
        times.push(times[i - 1] + dt);
    }
    times
}

/// Interpolated ghost output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplaySample {
    pub position: Option<Position>,
    pub distance: f64,
    pub speed: f64,
    pub power: Option<f64>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub altitude: Option<f64>,
    /// Recording time of this sample
    pub virtual_time: f64,
}

/// Emitted once when playback reaches the end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayFinished {
    pub total_time: f64,
    pub total_distance: f64,
}

/// Output of one [`ReplayEngine::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayTick {
    pub sample: ReplaySample,
    pub finished: Option<ReplayFinished>,
}

/// Live athlete versus recording at the same distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GhostComparison {
    /// `recorded_time - live_time` in seconds; positive when the live athlete got here sooner
    pub ahead_by: f64,
    /// When the recording reached the live distance
    pub recorded_time: f64,
    /// Lower confidence when the recording's timing was synthesized
    pub is_synthesized_timing: bool,
}

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    /// Recording seconds
    pub virtual_time: f64,
    pub speed_multiplier: f64,
    pub is_playing: bool,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            virtual_time: 0.0,
            speed_multiplier: 1.0,
            is_playing: false,
        }
    }
}

/// Plays a [`ReplayRecording`] under an independent virtual clock.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    recording: ReplayRecording,
    state: ReplayState,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn load(recording: ReplayRecording, config: ReplayConfig) -> Result<Self> {
        recording.validate()?;
        Ok(Self {
            recording,
            state: ReplayState::default(),
            config,
        })
    }

    /// Normalize raw samples and load them.
    pub fn from_samples(
        samples: Vec<RawTelemetrySample>,
        config: ReplayConfig,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let recording = ReplayRecording::from_samples(samples, &config, metric)?;
        Self::load(recording, config)
    }

    pub fn recording(&self) -> &ReplayRecording {
        &self.recording
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn is_synthesized_timing(&self) -> bool {
        self.recording.is_synthesized_timing()
    }

    pub fn virtual_time(&self) -> f64 {
        self.state.virtual_time
    }

    /// Fractional index into the recording's points for the current virtual time.
    pub fn virtual_index(&self) -> f64 {
        self.recording.index_at_time(self.state.virtual_time)
    }

    /// Start or resume playback. A finished replay restarts from the beginning.
    /// Invalid multipliers keep the current one.
    pub fn play(&mut self, speed_multiplier: f64) {
        if speed_multiplier.is_finite() && speed_multiplier > 0.0 {
            self.state.speed_multiplier = speed_multiplier.min(self.config.max_speed_multiplier);
        } else {
            warn!(
                "[ReplayEngine] Ignoring speed multiplier {}, keeping {}",
                speed_multiplier, self.state.speed_multiplier
            );
        }
        if self.state.virtual_time >= self.recording.total_duration() {
            self.state.virtual_time = 0.0;
        }
        self.state.is_playing = true;
    }

    pub fn pause(&mut self) {
        self.state.is_playing = false;
    }

    /// Pause and rewind.
    pub fn stop(&mut self) {
        self.state.is_playing = false;
        self.state.virtual_time = 0.0;
    }

    /// Move the virtual clock, clamped to the recording. Non-finite input is ignored.
    pub fn seek_to_time(&mut self, t: f64) {
        if t.is_finite() {
            self.state.virtual_time = t.clamp(0.0, self.recording.total_duration());
        }
    }

    /// Seek to a fraction (0..1) of the total duration.
    pub fn seek_to_fraction(&mut self, f: f64) {
        if f.is_finite() {
            self.seek_to_time(f.clamp(0.0, 1.0) * self.recording.total_duration());
        }
    }

    /// Apply a saved playback state, clamping it to this recording.
    pub fn restore_state(&mut self, state: ReplayState) {
        self.state.is_playing = state.is_playing;
        self.seek_to_time(state.virtual_time);
        if state.speed_multiplier.is_finite() && state.speed_multiplier > 0.0 {
            self.state.speed_multiplier = state.speed_multiplier.min(self.config.max_speed_multiplier);
        }
    }

    /// Sample at the current virtual time without advancing.
    pub fn current_sample(&self) -> ReplaySample {
        self.recording.sample_at(self.state.virtual_time)
    }

    /// Advance by `delta_wall_time` seconds of wall time.
    ///
    /// Returns `Ok(None)` while paused. Playback stops on the tick that reaches the
    /// end, which carries [`ReplayFinished`].
    pub fn tick(&mut self, delta_wall_time: f64) -> Result<Option<ReplayTick>> {
        if !delta_wall_time.is_finite() {
            return Err(TrackingError::NonFiniteSample("replay tick"));
        }
        if !self.state.is_playing {
            return Ok(None);
        }

        let total = self.recording.total_duration();
        let advance = delta_wall_time.max(0.0) * self.state.speed_multiplier;
        self.state.virtual_time = (self.state.virtual_time + advance).min(total);

        let sample = self.recording.sample_at(self.state.virtual_time);
        let finished = if self.state.virtual_time >= total {
            self.state.is_playing = false;
            info!("[ReplayEngine] Finished at {:.1}s", total);
            Some(ReplayFinished {
                total_time: total,
                total_distance: self.recording.total_distance(),
            })
        } else {
            None
        };

        Ok(Some(ReplayTick { sample, finished }))
    }

    /// Compare a live athlete at `live_distance` after `live_time` seconds.
    pub fn compare_against(&self, live_distance: f64, live_time: f64) -> Option<GhostComparison> {
        if !live_distance.is_finite() || !live_time.is_finite() {
            return None;
        }
        let recorded_time = self.recording.time_at_distance(live_distance);
        Some(GhostComparison {
            ahead_by: recorded_time - live_time,
            recorded_time,
            is_synthesized_timing: self.is_synthesized_timing(),
        })
    }

    /// Recorded time at distance `d`, independent of playback state.
    pub fn time_at_distance(&self, d: f64) -> f64 {
        self.recording.time_at_distance(d)
    }

    /// Live distance minus recorded distance at the same elapsed time.
    pub fn distance_gap(&self, live_distance: f64, live_time: f64) -> f64 {
        live_distance - self.recording.distance_at_time(live_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn timed(time: f64, distance: f64) -> RawTelemetrySample {
        RawTelemetrySample {
            time: Some(time),
            distance: Some(distance),
            position: Some(Position::new(0.0, distance)),
            ..Default::default()
        }
    }

    fn engine(samples: Vec<RawTelemetrySample>) -> ReplayEngine {
        ReplayEngine::from_samples(samples, ReplayConfig::default(), DistanceMetric::Planar).unwrap()
    }

    #[test]
    fn test_time_at_distance_interpolates() {
        let e = engine(vec![timed(0.0, 0.0), timed(10.0, 100.0)]);
        assert_eq!(e.time_at_distance(50.0), 5.0);
        assert_eq!(e.time_at_distance(-1.0), 0.0);
        assert_eq!(e.time_at_distance(500.0), 10.0);
    }

    #[test]
    fn test_empty_recording() {
        let err = ReplayEngine::from_samples(vec![], ReplayConfig::default(), DistanceMetric::Planar).unwrap_err();
        assert_eq!(err, TrackingError::EmptyRecording);

        let bad = vec![RawTelemetrySample { time: Some(f64::NAN), ..Default::default() }];
        assert!(ReplayEngine::from_samples(bad, ReplayConfig::default(), DistanceMetric::Planar).is_err());
    }

    #[test]
    fn test_sorts_and_dedupes() {
        let e = engine(vec![timed(20.0, 200.0), timed(10.0, 100.0), timed(10.0, 999.0), timed(12.0, 120.0)]);
        let times: Vec<f64> = e.recording().points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 2.0, 10.0]);
        assert_eq!(e.recording().points()[0].distance, 100.0);
        assert!(!e.is_synthesized_timing());
    }

    #[test]
    fn test_backwards_distance_clamped() {
        let e = engine(vec![timed(0.0, 0.0), timed(1.0, 10.0), timed(2.0, 8.0), timed(3.0, 20.0)]);
        let d: Vec<f64> = e.recording().points().iter().map(|p| p.distance).collect();
        assert_eq!(d, vec![0.0, 10.0, 10.0, 20.0]);
    }

    #[test]
    fn test_distance_filled_from_positions() {
        let samples = vec![
            RawTelemetrySample { time: Some(0.0), position: Some(Position::new(0.0, 0.0)), ..Default::default() },
            RawTelemetrySample { time: Some(1.0), position: Some(Position::new(3.0, 4.0)), ..Default::default() },
        ];
        let e = engine(samples);
        assert_eq!(e.recording().total_distance(), 5.0);
        assert_eq!(e.recording().points()[1].speed, 5.0);
    }

    #[test]
    fn test_synthesized_timing() {
        let samples = vec![
            RawTelemetrySample { distance: Some(0.0), speed: Some(5.0), ..Default::default() },
            RawTelemetrySample { distance: Some(50.0), speed: Some(5.0), ..Default::default() },
            RawTelemetrySample { distance: Some(50.0), speed: Some(0.0), ..Default::default() },
            RawTelemetrySample { distance: Some(60.0), speed: Some(10.0), ..Default::default() },
        ];
        let e = engine(samples);
        assert!(e.is_synthesized_timing());
        let times: Vec<f64> = e.recording().points().iter().map(|p| p.time).collect();
        assert_eq!(times[1], 10.0);
        // Zero distance step is clamped to the minimum step
        assert!(approx_eq(times[2], 10.1, 1e-9));
        assert!(approx_eq(times[3], 12.1, 1e-9));
        for w in times.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!(e.compare_against(10.0, 1.0).unwrap().is_synthesized_timing);
    }

    #[test]
    fn test_tick_interpolates_and_finishes() {
        let mut samples = vec![timed(0.0, 0.0), timed(10.0, 100.0)];
        samples[0].heart_rate = Some(100.0);
        samples[1].heart_rate = Some(140.0);
        let mut e = engine(samples);

        assert!(e.tick(1.0).unwrap().is_none());

        e.play(2.0);
        let t = e.tick(1.5).unwrap().unwrap();
        assert_eq!(t.sample.virtual_time, 3.0);
        assert_eq!(t.sample.distance, 30.0);
        assert_eq!(t.sample.heart_rate, Some(112.0));
        assert_eq!(t.sample.position, Some(Position::new(0.0, 30.0)));
        assert!(t.finished.is_none());
        assert!(approx_eq(e.virtual_index(), 0.3, 1e-12));

        let t = e.tick(10.0).unwrap().unwrap();
        assert_eq!(t.sample.virtual_time, 10.0);
        assert_eq!(
            t.finished,
            Some(ReplayFinished { total_time: 10.0, total_distance: 100.0 })
        );
        assert!(!e.is_playing());
        assert!(e.tick(1.0).unwrap().is_none());

        // Playing again after the end restarts
        e.play(1.0);
        assert_eq!(e.virtual_time(), 0.0);
    }

    #[test]
    fn test_pause_seek_stop() {
        let mut e = engine(vec![timed(0.0, 0.0), timed(10.0, 100.0)]);
        e.play(1.0);
        e.tick(2.0).unwrap();
        e.pause();
        assert!(e.tick(2.0).unwrap().is_none());
        assert_eq!(e.virtual_time(), 2.0);

        e.seek_to_fraction(0.5);
        assert_eq!(e.virtual_time(), 5.0);
        e.seek_to_time(99.0);
        assert_eq!(e.virtual_time(), 10.0);
        e.seek_to_time(f64::NAN);
        assert_eq!(e.virtual_time(), 10.0);

        e.stop();
        assert_eq!(e.virtual_time(), 0.0);
        assert!(!e.is_playing());
    }

    #[test]
    fn test_invalid_multiplier_and_tick() {
        let mut e = engine(vec![timed(0.0, 0.0), timed(10.0, 100.0)]);
        e.play(-3.0);
        assert_eq!(e.state().speed_multiplier, 1.0);
        e.play(1_000.0);
        assert_eq!(e.state().speed_multiplier, 64.0);

        let before = e.state();
        assert!(e.tick(f64::NAN).is_err());
        assert_eq!(e.state(), before);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let samples: Vec<RawTelemetrySample> = (0..20)
            .map(|i| timed(i as f64 * 1.7, (i * i) as f64))
            .collect();
        let run = || {
            let mut e = engine(samples.clone());
            e.play(1.3);
            let mut out = Vec::new();
            while let Some(t) = e.tick(0.25).unwrap() {
                out.push(t.sample);
            }
            out
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_compare_and_gap() {
        let e = engine(vec![timed(0.0, 0.0), timed(100.0, 1000.0)]);
        // Recording reached 500 at 50s; live got there at 45s
        let cmp = e.compare_against(500.0, 45.0).unwrap();
        assert_eq!(cmp.recorded_time, 50.0);
        assert_eq!(cmp.ahead_by, 5.0);
        assert!(e.compare_against(f64::NAN, 1.0).is_none());

        assert_eq!(e.distance_gap(500.0, 45.0), 50.0);
    }

    #[test]
    fn test_single_point_recording() {
        let mut e = engine(vec![timed(3.0, 7.0)]);
        assert_eq!(e.recording().total_duration(), 0.0);
        e.play(1.0);
        let t = e.tick(0.1).unwrap().unwrap();
        assert!(t.finished.is_some());
        assert_eq!(t.sample.distance, 7.0);
        assert_eq!(e.time_at_distance(100.0), 0.0);
    }

    #[test]
    fn test_deserialized_recording_is_normalized() {
        let json = r#"{"points": [
            {"time": 0, "distance": 0, "speed": 10},
            {"time": 20, "distance": 200, "speed": 10},
            {"time": 10, "distance": 100, "speed": 10},
            {"time": 10, "distance": 150, "speed": 10}
        ]}"#;
        let recording: ReplayRecording = serde_json::from_str(json).unwrap();
        let times: Vec<f64> = recording.points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 10.0, 20.0]);
        assert_eq!(recording.total_duration(), 20.0);
        assert_eq!(recording.total_distance(), 200.0);

        let mut e = ReplayEngine::load(recording, ReplayConfig::default()).unwrap();
        e.play(1.0);
        let t = e.tick(15.0).unwrap().unwrap();
        assert!(t.finished.is_none());
        assert_eq!(t.sample.distance, 150.0);

        let empty: std::result::Result<ReplayRecording, _> = serde_json::from_str(r#"{"points": []}"#);
        assert!(empty.is_err());
    }

    #[test]
    fn test_load_rejects_unordered_points() {
        let point = |time: f64, distance: f64| TimePoint {
            time,
            position: None,
            distance,
            speed: 0.0,
            power: None,
            heart_rate: None,
            cadence: None,
            altitude: None,
        };
        let unordered = ReplayRecording {
            points: vec![point(0.0, 0.0), point(20.0, 200.0), point(10.0, 100.0)],
            synthesized_timing: false,
        };
        assert!(matches!(
            ReplayEngine::load(unordered, ReplayConfig::default()),
            Err(TrackingError::InvalidRecording(_))
        ));

        let duplicate = ReplayRecording {
            points: vec![point(0.0, 0.0), point(0.0, 10.0)],
            synthesized_timing: false,
        };
        assert!(ReplayEngine::load(duplicate, ReplayConfig::default()).is_err());

        let empty = ReplayRecording { points: vec![], synthesized_timing: false };
        assert_eq!(
            ReplayEngine::load(empty, ReplayConfig::default()).unwrap_err(),
            TrackingError::EmptyRecording
        );
    }

    #[test]
    fn test_field_aliases_normalize() {
        let json = r#"[
            {"elapsed": 0, "dist": 0, "hr": 120, "watts": 200, "ele": 12.5},
            {"t": 4, "distance_m": 20, "heartrate": 130, "rpm": 90, "velocity_smooth": 5}
        ]"#;
        let raw: Vec<RawTelemetrySample> = serde_json::from_str(json).unwrap();
        assert_eq!(raw[0].heart_rate, Some(120.0));
        assert_eq!(raw[0].power, Some(200.0));
        assert_eq!(raw[0].altitude, Some(12.5));
        assert_eq!(raw[1].time, Some(4.0));
        assert_eq!(raw[1].cadence, Some(90.0));
        assert_eq!(raw[1].speed, Some(5.0));

        let e = engine(raw);
        assert_eq!(e.recording().total_distance(), 20.0);
    }
}

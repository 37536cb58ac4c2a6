//! Error taxonomy for route tracking.
//!
//! Construction-time errors (`PathIndex::build`, tracker `load`, replay `load`) are
//! returned to the caller. Per-sample errors from `update`/`tick` leave the tracker
//! untouched, so the caller can log them and carry on with the next sample.

/// Errors produced by the tracking core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("Path has no points")]
    EmptyPath,
    #[error("Invalid checkpoint '{id}': {reason}")]
    InvalidCheckpoint { id: String, reason: String },
    #[error("Invalid segment '{id}': {reason}")]
    InvalidSegment { id: String, reason: String },
    #[error("Recording has no usable time points")]
    EmptyRecording,
    #[error("Invalid recording: {0}")]
    InvalidRecording(&'static str),
    #[error("Non-finite value in {0}")]
    NonFiniteSample(&'static str),
    #[error("Unknown id in snapshot: {0}")]
    UnknownId(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

impl TrackingError {
    pub(crate) fn invalid_checkpoint(id: &str, reason: impl Into<String>) -> Self {
        TrackingError::InvalidCheckpoint {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_segment(id: &str, reason: impl Into<String>) -> Self {
        TrackingError::InvalidSegment {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that only discard a single sample.
    pub fn is_per_sample(&self) -> bool {
        matches!(self, TrackingError::NonFiniteSample(_))
    }
}

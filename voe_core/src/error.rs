//! Error types for the VOE engine.

use thiserror::Error;

use crate::voe_history::FrameTime;

/// Fatal, scene-level errors.
///
/// Any of these aborts processing of the current scene. Insufficient history
/// and predictor failures are *not* errors: they surface as an
/// undeterminable frame (`Ok(None)`) instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VoeError {
    /// A frame time was recorded twice.
    #[error("Frame {0} has already been recorded")]
    DuplicateTime(FrameTime),

    /// Parallel input slices disagree in length.
    #[error("Input length mismatch: {what} (expected {expected}, got {actual})")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The predictor returned a different number of positions than queried.
    #[error("Predictor returned {actual} positions for {expected} queries")]
    PredictionShape { expected: usize, actual: usize },

    /// Two buffers that must share a shape do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Detector configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VoeError {
    /// Creates a length mismatch error.
    pub fn length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Returns true for errors raised by the predictor contract check.
    pub fn is_predictor_contract(&self) -> bool {
        matches!(self, Self::PredictionShape { .. })
    }
}

/// Recoverable failures reported by a position predictor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictorError {
    /// Predictor did not answer within its time budget.
    #[error("Prediction timed out after {0}ms")]
    Timeout(u64),

    /// Predictor refused or failed to produce an answer.
    #[error("Predictor failure: {0}")]
    Failed(String),

    /// Predictor worker went away without answering.
    #[error("Predictor worker disconnected")]
    Disconnected,
}

impl PredictorError {
    /// Creates a generic failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Failures of a reporting sink. Never propagated into detector state.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink rejected report: {0}")]
    Rejected(String),
}

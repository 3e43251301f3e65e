//! Replay domain errors.

use thiserror::Error;

/// Errors raised when building or rebasing a [`super::PseudoClock`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ClockError {
    /// Speed multiplier was zero, negative, or not finite.
    #[error("playback scale must be a positive finite number, got {0}")]
    InvalidScale(f64),
}

/// Errors raised while turning a fetched sample into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    /// Timestamp missing or not in a recognised format.
    #[error("unparsable timestamp: {0}")]
    Timestamp(String),

    /// Value missing, non-numeric, or not finite.
    #[error("unparsable value: {0}")]
    Value(String),
}

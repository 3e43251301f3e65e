//! Seek Controller
//!
//! Applies consumer seek requests: drains the queue and rebases the clock
//! in one step, then wakes the fetcher so it refills from the new origin.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::session::SessionShared;
use crate::infrastructure::metrics::{self, SeekOutcome};

// =============================================================================
// Seek Command
// =============================================================================

/// Request to jump playback to a new virtual start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekCommand {
    /// New virtual origin.
    pub start: DateTime<Utc>,
    /// New speed; `None` keeps the current one.
    pub scale: Option<f64>,
}

/// Extended wire form: `{"seek": <epoch>, "scale": <number>}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeekRequest {
    seek: i64,
    #[serde(default)]
    scale: Option<f64>,
}

impl SeekCommand {
    /// Seek to `start`, keeping the current speed.
    #[must_use]
    pub const fn to(start: DateTime<Utc>) -> Self {
        Self { start, scale: None }
    }

    /// Also change the speed.
    #[must_use]
    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Seek to a Unix epoch in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::OutOfRange`] if the epoch is not representable.
    pub fn from_unix(epoch_secs: i64) -> Result<Self, SeekError> {
        DateTime::from_timestamp(epoch_secs, 0)
            .map(Self::to)
            .ok_or(SeekError::OutOfRange(epoch_secs))
    }

    /// Parse a seek frame received from a consumer.
    ///
    /// A bare integer is a Unix epoch and resets the speed to
    /// `default_scale`. The JSON form may carry its own `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError`] if the frame is not a valid seek.
    pub fn parse(text: &str, default_scale: f64) -> Result<Self, SeekError> {
        let text = text.trim();

        let (epoch, scale) = if let Ok(epoch) = text.parse::<i64>() {
            (epoch, None)
        } else {
            let request: SeekRequest = serde_json::from_str(text)
                .map_err(|_| SeekError::Malformed(text.to_string()))?;
            (request.seek, request.scale)
        };

        let command = Self::from_unix(epoch)?.with_scale(scale.unwrap_or(default_scale));
        command.validate()?;
        Ok(command)
    }

    /// Check the requested speed, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::InvalidScale`] for a non-positive or non-finite
    /// speed.
    pub fn validate(&self) -> Result<(), SeekError> {
        match self.scale {
            Some(scale) if !(scale.is_finite() && scale > 0.0) => {
                Err(SeekError::InvalidScale(scale))
            }
            _ => Ok(()),
        }
    }
}

/// Seek request errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeekError {
    /// Frame is neither an integer epoch nor a JSON seek object.
    #[error("malformed seek request: {0:?}")]
    Malformed(String),

    /// Epoch outside the representable range.
    #[error("seek target {0} is out of range")]
    OutOfRange(i64),

    /// Requested speed unusable.
    #[error("seek scale must be a positive finite number, got {0}")]
    InvalidScale(f64),

    /// The session has ended.
    #[error("replay session is closed")]
    SessionClosed,
}

// =============================================================================
// Controller Loop
// =============================================================================

pub(crate) struct SeekController {
    shared: Arc<SessionShared>,
    commands: mpsc::Receiver<SeekCommand>,
}

impl SeekController {
    pub(crate) fn new(shared: Arc<SessionShared>, commands: mpsc::Receiver<SeekCommand>) -> Self {
        Self { shared, commands }
    }

    /// Run until the session is cancelled or the handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let command = tokio::select! {
                () = self.shared.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.apply(command).await;
        }

        tracing::debug!("Seek controller stopped");
    }

    async fn apply(&self, command: SeekCommand) {
        let shared = &self.shared;

        // Wait out any delivery in progress so nothing popped under the old
        // origin reaches the sink after the rebase.
        let _gate = tokio::select! {
            () = shared.cancel.cancelled() => return,
            gate = shared.delivery_gate.lock() => gate,
        };

        let rebased = {
            let mut schedule = shared.schedule.lock();
            let scale = command.scale.unwrap_or_else(|| schedule.scale());
            schedule
                .rebase(command.start, scale)
                .map(|discarded| (discarded, scale))
        };

        match rebased {
            Ok((discarded, scale)) => {
                shared.rebased.notify_one();
                shared.queue_changed.notify_one();
                metrics::record_seek(SeekOutcome::Applied);
                tracing::info!(start = %command.start, scale, discarded, "Seek applied");
            }
            Err(e) => {
                metrics::record_seek(SeekOutcome::Rejected);
                tracing::warn!(start = %command.start, error = %e, "Seek rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("1401926400", 1_401_926_400, 1.0 ; "bare epoch")]
    #[test_case("  1401926407\n", 1_401_926_407, 1.0 ; "surrounding whitespace")]
    #[test_case(r#"{"seek": 1401926400}"#, 1_401_926_400, 1.0 ; "json without scale")]
    #[test_case(r#"{"seek": 1401926400, "scale": 10}"#, 1_401_926_400, 10.0 ; "json with scale")]
    #[test_case("0", 0, 1.0 ; "epoch zero")]
    fn parses_valid_frames(text: &str, epoch: i64, scale: f64) {
        let command = SeekCommand::parse(text, 1.0).unwrap();
        assert_eq!(command.start.timestamp(), epoch);
        assert_eq!(command.scale, Some(scale));
    }

    #[test_case("" ; "empty")]
    #[test_case("tomorrow" ; "word")]
    #[test_case("1401926400.5" ; "fractional epoch")]
    #[test_case(r#"{"start": 1401926400}"# ; "wrong key")]
    #[test_case(r#"{"seek": "1401926400"}"# ; "string epoch")]
    fn rejects_malformed_frames(text: &str) {
        assert!(matches!(
            SeekCommand::parse(text, 1.0),
            Err(SeekError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_bad_scale() {
        assert_eq!(
            SeekCommand::parse(r#"{"seek": 0, "scale": 0}"#, 1.0),
            Err(SeekError::InvalidScale(0.0))
        );
        assert_eq!(
            SeekCommand::parse(r#"{"seek": 0, "scale": -2.5}"#, 1.0),
            Err(SeekError::InvalidScale(-2.5))
        );
    }

    #[test]
    fn rejects_unrepresentable_epoch() {
        assert_eq!(
            SeekCommand::parse(&i64::MAX.to_string(), 1.0),
            Err(SeekError::OutOfRange(i64::MAX))
        );
    }

    #[test]
    fn bare_epoch_uses_session_default_scale() {
        let command = SeekCommand::parse("1401926400", 4.0).unwrap();
        assert_eq!(command.scale, Some(4.0));
    }

    #[test]
    fn builder_keeps_scale_unset() {
        let start = DateTime::from_timestamp(1_401_926_400, 0).unwrap();
        assert_eq!(SeekCommand::to(start).scale, None);
        assert_eq!(SeekCommand::to(start).with_scale(2.0).scale, Some(2.0));
        assert!(SeekCommand::to(start).validate().is_ok());
    }
}

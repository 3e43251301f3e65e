//! Pseudo clock mapping real elapsed time onto the recorded timeline.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

use super::error::ClockError;

/// Maps real elapsed time to virtual ("historical") time.
///
/// `virtual_now = virtual_origin + scale * (real_now - local_origin)`
///
/// The clock is a plain `Copy` value. Rebasing replaces the whole origin
/// triple at once, so a reader holding a copy can never observe the old
/// origin combined with a new scale.
///
/// Real time is read from [`tokio::time::Instant`], which lets tests pause
/// and advance the runtime clock deterministically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoClock {
    local_origin: Instant,
    virtual_origin: DateTime<Utc>,
    scale: f64,
}

impl PseudoClock {
    /// Start a clock at `virtual_origin`, anchored to the current instant.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidScale`] unless `scale` is positive and finite.
    pub fn start(virtual_origin: DateTime<Utc>, scale: f64) -> Result<Self, ClockError> {
        Self::anchored(Instant::now(), virtual_origin, scale)
    }

    /// Start a clock anchored to an explicit real instant.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidScale`] unless `scale` is positive and finite.
    pub fn anchored(
        local_origin: Instant,
        virtual_origin: DateTime<Utc>,
        scale: f64,
    ) -> Result<Self, ClockError> {
        validate_scale(scale)?;
        Ok(Self {
            local_origin,
            virtual_origin,
            scale,
        })
    }

    /// Discard the current mapping and start again from a new origin pair.
    ///
    /// On error the existing mapping is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidScale`] unless `scale` is positive and finite.
    pub fn restart(&mut self, virtual_origin: DateTime<Utc>, scale: f64) -> Result<(), ClockError> {
        *self = Self::start(virtual_origin, scale)?;
        Ok(())
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.at(Instant::now())
    }

    /// Virtual time corresponding to the real instant `instant`.
    ///
    /// Instants before the local origin map to the virtual origin.
    #[must_use]
    pub fn at(&self, instant: Instant) -> DateTime<Utc> {
        let elapsed = instant.saturating_duration_since(self.local_origin);
        let scaled = Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.scale)
            .unwrap_or(Duration::MAX);
        let delta = TimeDelta::from_std(scaled).unwrap_or(TimeDelta::MAX);
        self.virtual_origin
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Real time that must pass before the clock reaches `target`.
    ///
    /// Returns zero if `target` is already in the virtual past.
    #[must_use]
    pub fn real_until(&self, target: DateTime<Utc>) -> Duration {
        let remaining = target - self.now();
        if remaining <= TimeDelta::zero() {
            return Duration::ZERO;
        }
        let virtual_secs = remaining.to_std().map_or(f64::MAX, |d| d.as_secs_f64());
        Duration::try_from_secs_f64(virtual_secs / self.scale).unwrap_or(Duration::MAX)
    }

    /// Virtual time at the origin.
    #[must_use]
    pub const fn virtual_origin(&self) -> DateTime<Utc> {
        self.virtual_origin
    }

    /// Speed multiplier.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Real instant the origin is anchored to.
    #[must_use]
    pub const fn local_origin(&self) -> Instant {
        self.local_origin
    }
}

fn validate_scale(scale: f64) -> Result<(), ClockError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(ClockError::InvalidScale(scale))
    }
}

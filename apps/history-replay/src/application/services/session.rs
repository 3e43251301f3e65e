//! Replay Session
//!
//! One session per consumer. A session owns its clock, queue and
//! configuration and runs three loops on the tokio runtime:
//!
//! ```text
//! HistoryPort ──► ChunkFetcher ──► Schedule(queue) ──► Dispatcher ──► EventSink
//!                                     ▲
//!                    SeekCommand ──► SeekController (drain + rebase)
//! ```
//!
//! Nothing is shared between sessions except the read-only sensor catalog
//! and the history source.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::dispatcher::Dispatcher;
use super::fetcher::ChunkFetcher;
use super::retry::RetryConfig;
use super::seek::{SeekCommand, SeekController, SeekError};
use crate::application::ports::{EventSink, HistoryPort};
use crate::domain::replay::{ClockError, PseudoClock, Schedule, ScheduleSnapshot};
use crate::domain::sensor::SensorCatalog;
use crate::infrastructure::metrics;

/// Default replay start: 2014-06-05T00:00:00Z.
pub const DEFAULT_START_UNIX: i64 = 1_401_926_400;

const SEEK_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Configuration
// =============================================================================

/// Per-session replay parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Virtual time the replay starts at.
    pub start: DateTime<Utc>,
    /// Playback speed multiplier.
    pub scale: f64,
    /// How far the fetch horizon may run ahead of virtual time.
    pub look_ahead: TimeDelta,
    /// Length of each historical window fetched.
    pub chunk_length: TimeDelta,
    /// Upper bound on how long the dispatcher sleeps before re-checking.
    pub poll_interval: Duration,
    /// Upper bound on how long the fetcher sleeps under backpressure.
    pub backpressure_interval: Duration,
    /// Backoff between failed chunk fetches.
    pub retry: RetryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start: DateTime::from_timestamp(DEFAULT_START_UNIX, 0).unwrap_or_default(),
            scale: 1.0,
            look_ahead: TimeDelta::seconds(1000),
            chunk_length: TimeDelta::seconds(2000),
            poll_interval: Duration::from_millis(50),
            backpressure_interval: Duration::from_millis(100),
            retry: RetryConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Check that the parameters describe a runnable session.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<(), SessionConfigError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(SessionConfigError::InvalidScale(self.scale));
        }
        if self.chunk_length <= TimeDelta::zero() {
            return Err(SessionConfigError::NonPositiveChunkLength);
        }
        if self.look_ahead < TimeDelta::zero() {
            return Err(SessionConfigError::NegativeLookAhead);
        }
        if self.poll_interval.is_zero() {
            return Err(SessionConfigError::ZeroPollInterval);
        }
        if self.backpressure_interval.is_zero() {
            return Err(SessionConfigError::ZeroBackpressureInterval);
        }
        self.validate_retry()
    }

    /// A failed fetch is retried forever, so the backoff must actually back off.
    fn validate_retry(&self) -> Result<(), SessionConfigError> {
        let retry = &self.retry;
        if retry.initial_delay.is_zero() {
            return Err(SessionConfigError::ZeroRetryDelay);
        }
        if retry.max_delay < retry.initial_delay {
            return Err(SessionConfigError::RetryMaxBelowInitial);
        }
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(SessionConfigError::InvalidRetryMultiplier(retry.multiplier));
        }
        if !(0.0..1.0).contains(&retry.jitter_factor) {
            return Err(SessionConfigError::InvalidRetryJitter(retry.jitter_factor));
        }
        Ok(())
    }
}

/// Invalid session configuration.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SessionConfigError {
    /// Speed multiplier unusable.
    #[error("playback scale must be a positive finite number, got {0}")]
    InvalidScale(f64),
    /// Chunk length must be positive.
    #[error("chunk length must be positive")]
    NonPositiveChunkLength,
    /// Look-ahead window must not be negative.
    #[error("look-ahead window must not be negative")]
    NegativeLookAhead,
    /// Poll interval must be non-zero.
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    /// Backpressure interval must be non-zero.
    #[error("backpressure interval must be non-zero")]
    ZeroBackpressureInterval,
    /// First retry delay must be non-zero.
    #[error("retry initial delay must be non-zero")]
    ZeroRetryDelay,
    /// Retry delay cap below the first delay.
    #[error("retry max delay must not be below the initial delay")]
    RetryMaxBelowInitial,
    /// Backoff multiplier would shrink or overflow the delay.
    #[error("retry multiplier must be a finite number >= 1, got {0}")]
    InvalidRetryMultiplier(f64),
    /// Jitter outside `[0, 1)`.
    #[error("retry jitter factor must be in [0, 1), got {0}")]
    InvalidRetryJitter(f64),
}

impl From<ClockError> for SessionConfigError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::InvalidScale(scale) => Self::InvalidScale(scale),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the three loops of one session.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) id: Uuid,
    pub(crate) config: SessionConfig,
    /// Clock, horizon and queue. Held only for non-blocking reads/updates.
    pub(crate) schedule: Mutex<Schedule>,
    /// Held by the dispatcher from pop to sink acceptance, and by a seek
    /// for drain + rebase.
    pub(crate) delivery_gate: tokio::sync::Mutex<()>,
    /// Signalled when events are queued or the queue is drained.
    pub(crate) queue_changed: Notify,
    /// Signalled after every rebase.
    pub(crate) rebased: Notify,
    pub(crate) cancel: CancellationToken,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        metrics::record_session_ended();
    }
}

// =============================================================================
// Session
// =============================================================================

/// Factory for replay sessions.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySession;

impl ReplaySession {
    /// Validate `config` and start the fetcher, dispatcher and seek loops.
    ///
    /// The session stops when `cancel` is cancelled, when the returned
    /// handle is dropped, or when `sink` reports the consumer is gone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionConfigError`] if `config` is invalid.
    pub fn spawn(
        config: SessionConfig,
        catalog: Arc<SensorCatalog>,
        history: Arc<dyn HistoryPort>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<SessionHandle, SessionConfigError> {
        config.validate()?;
        let clock = PseudoClock::start(config.start, config.scale)?;

        let id = Uuid::new_v4();
        metrics::record_session_started();

        let shared = Arc::new(SessionShared {
            id,
            schedule: Mutex::new(Schedule::new(clock)),
            delivery_gate: tokio::sync::Mutex::new(()),
            queue_changed: Notify::new(),
            rebased: Notify::new(),
            cancel,
            config,
        });

        tracing::info!(
            session_id = %id,
            start = %shared.config.start,
            scale = shared.config.scale,
            sensors = catalog.len(),
            source = history.name(),
            "Replay session started"
        );

        let (seek_tx, seek_rx) = mpsc::channel(SEEK_CHANNEL_CAPACITY);
        let span = tracing::info_span!("replay_session", session_id = %id);

        let fetcher = ChunkFetcher::new(Arc::clone(&shared), catalog, history);
        let dispatcher = Dispatcher::new(Arc::clone(&shared), sink);
        let seek_controller = SeekController::new(Arc::clone(&shared), seek_rx);

        let tasks = vec![
            tokio::spawn(fetcher.run().instrument(span.clone())),
            tokio::spawn(dispatcher.run().instrument(span.clone())),
            tokio::spawn(seek_controller.run().instrument(span)),
        ];

        Ok(SessionHandle {
            id,
            shared,
            seek_tx,
            tasks,
        })
    }
}

/// Control handle for a running session. Dropping it ends the session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    shared: Arc<SessionShared>,
    seek_tx: mpsc::Sender<SeekCommand>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Speed the session was configured with.
    #[must_use]
    pub fn default_scale(&self) -> f64 {
        self.shared.config.scale
    }

    /// Request a jump to a new point in the timeline.
    ///
    /// Returns once the request is queued for the seek controller; the drain
    /// and rebase happen asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::InvalidScale`] for an unusable speed and
    /// [`SeekError::SessionClosed`] if the session has ended.
    pub async fn seek(&self, command: SeekCommand) -> Result<(), SeekError> {
        command.validate()?;
        if self.shared.cancel.is_cancelled() {
            return Err(SeekError::SessionClosed);
        }
        self.seek_tx
            .send(command)
            .await
            .map_err(|_| SeekError::SessionClosed)
    }

    /// Current clock, horizon and queue depth.
    #[must_use]
    pub fn snapshot(&self) -> ScheduleSnapshot {
        self.shared.schedule.lock().snapshot()
    }

    /// Token that is cancelled when the session ends.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait until the session ends.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// End the session and wait for its loops to stop.
    pub async fn shutdown(mut self) {
        self.shared.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.id, error = %e, "Replay task failed");
            }
        }
        tracing::info!(session_id = %self.id, "Replay session stopped");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

//! Prometheus Metrics Module
//!
//! Exposes replay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Active replay sessions
//! - **Events**: Events queued and delivered
//! - **Fetching**: Chunks fetched, fetch failures, stale chunks, fetch latency
//! - **Samples**: Samples skipped during parsing, by reason
//! - **Seeks**: Seek requests by outcome
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "history_replay_sessions_active",
        "Number of running replay sessions"
    );

    describe_counter!(
        "history_replay_events_delivered_total",
        "Total events delivered to consumers"
    );
    describe_counter!(
        "history_replay_events_queued_total",
        "Total events queued for delivery"
    );

    describe_counter!(
        "history_replay_chunks_fetched_total",
        "Total history chunks fetched"
    );
    describe_counter!(
        "history_replay_fetch_failures_total",
        "Total failed chunk fetches"
    );
    describe_counter!(
        "history_replay_stale_chunks_total",
        "Total chunks discarded because a seek happened mid-fetch"
    );
    describe_counter!(
        "history_replay_samples_skipped_total",
        "Total samples skipped by reason"
    );
    describe_counter!(
        "history_replay_seeks_total",
        "Total seek requests by outcome"
    );

    describe_histogram!(
        "history_replay_fetch_duration_seconds",
        "Time to fetch one chunk for every sensor"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why a fetched sample was not queued.
#[derive(Debug, Clone, Copy)]
pub enum SkipReason {
    /// Timestamp or value could not be parsed.
    Malformed,
    /// Declared sensor is not in the catalog.
    UnknownSensor,
    /// Timestamp outside the requested window.
    OutOfWindow,
}

impl SkipReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnknownSensor => "unknown_sensor",
            Self::OutOfWindow => "out_of_window",
        }
    }
}

/// How a seek request ended.
#[derive(Debug, Clone, Copy)]
pub enum SeekOutcome {
    /// Queue drained and clock rebased.
    Applied,
    /// Well-formed request with unusable parameters.
    Rejected,
    /// Request could not be parsed.
    Malformed,
}

impl SeekOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a replay session starting.
pub fn record_session_started() {
    gauge!("history_replay_sessions_active").increment(1.0);
}

/// Record a replay session ending.
pub fn record_session_ended() {
    gauge!("history_replay_sessions_active").decrement(1.0);
}

/// Record one event handed to a consumer.
pub fn record_event_delivered() {
    counter!("history_replay_events_delivered_total").increment(1);
}

/// Record events queued from a committed chunk.
pub fn record_events_queued(count: usize) {
    counter!("history_replay_events_queued_total").increment(count as u64);
}

/// Record a successfully fetched chunk and how long it took.
pub fn record_chunk_fetched(duration: Duration) {
    counter!("history_replay_chunks_fetched_total").increment(1);
    histogram!("history_replay_fetch_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed chunk fetch.
pub fn record_fetch_failure() {
    counter!("history_replay_fetch_failures_total").increment(1);
}

/// Record a chunk discarded because of a concurrent seek.
pub fn record_stale_chunk() {
    counter!("history_replay_stale_chunks_total").increment(1);
}

/// Record a skipped sample.
pub fn record_sample_skipped(reason: SkipReason) {
    counter!(
        "history_replay_samples_skipped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a seek request.
pub fn record_seek(outcome: SeekOutcome) {
    counter!(
        "history_replay_seeks_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

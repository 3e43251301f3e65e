//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `HistoryPort`: Historical sample retrieval for a sensor and time range
//! - `EventSink`: Delivery of due events to the streaming consumer

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::replay::{RawSample, ReplayEvent};
use crate::domain::sensor::SensorRef;

// =============================================================================
// History Port
// =============================================================================

/// Historical data source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// Network or transport failure.
    #[error("history transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("history request to {url} failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Response body could not be decoded.
    #[error("history response could not be decoded: {0}")]
    Decode(String),

    /// Window holds more pages than the source is allowed to read.
    #[error("history at {url} exceeds the {max_pages} page limit")]
    PageLimit {
        /// First page requested.
        url: String,
        /// Configured page cap.
        max_pages: u32,
    },

    /// Source has no data for the sensor at all.
    #[error("no history for sensor {0}")]
    UnknownSensor(String),
}

/// Source of recorded samples.
#[async_trait]
pub trait HistoryPort: Send + Sync {
    /// Fetch samples for `sensor` with `start <= timestamp < end`, ordered by
    /// timestamp.
    async fn fetch_samples(
        &self,
        sensor: &SensorRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, HistoryError>;

    /// Name of this source, for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// Event Sink
// =============================================================================

/// Event sink error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer has gone away.
    #[error("event sink closed")]
    Closed,

    /// This event could not be delivered; later events may still be.
    #[error("event rejected by sink: {0}")]
    Rejected(String),
}

/// Destination for due events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Waits if the consumer is applying backpressure.
    async fn deliver(&self, event: ReplayEvent) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<ReplayEvent> {
    async fn deliver(&self, event: ReplayEvent) -> Result<(), SinkError> {
        self.send(event).await.map_err(|_| SinkError::Closed)
    }
}

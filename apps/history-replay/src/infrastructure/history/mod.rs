//! In-memory historical data source.
//!
//! Serves samples from memory, with optional injected failures and a log of
//! every request. Used by tests and local demos in place of the Chain API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::application::ports::{HistoryError, HistoryPort};
use crate::domain::replay::RawSample;
use crate::domain::sensor::{SensorId, SensorRef};

/// One `fetch_samples` call as seen by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Requested sensor.
    pub sensor: SensorId,
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

/// In-memory historical data source.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    data: HashMap<SensorId, Vec<RawSample>>,
    failures_remaining: AtomicU32,
    requests: Mutex<Vec<HistoryRequest>>,
}

impl InMemoryHistory {
    /// Create a new empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples for a sensor.
    pub fn add_samples(&mut self, sensor: &SensorId, samples: impl IntoIterator<Item = RawSample>) {
        self.data.entry(sensor.clone()).or_default().extend(samples);
    }

    /// Make the next `count` fetches fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HistoryPort for InMemoryHistory {
    async fn fetch_samples(
        &self,
        sensor: &SensorRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, HistoryError> {
        self.requests.lock().push(HistoryRequest {
            sensor: sensor.id.clone(),
            start,
            end,
        });

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HistoryError::Transport("injected failure".to_string()));
        }

        let samples = self
            .data
            .get(&sensor.id)
            .ok_or_else(|| HistoryError::UnknownSensor(sensor.id.to_string()))?;

        // Unparsable samples are passed through for the caller to reject.
        Ok(samples
            .iter()
            .filter(|sample| {
                sample
                    .parse()
                    .map_or(true, |(timestamp, _)| start <= timestamp && timestamp < end)
            })
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

//! Chunk Fetcher
//!
//! Keeps the replay queue stocked: fetches one chunk of history at a time
//! for every catalog sensor, as long as the fetched horizon stays within the
//! look-ahead window of virtual time.

use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use tokio::time::Instant;

use super::retry::RetryPolicy;
use super::session::SessionShared;
use crate::application::ports::{HistoryError, HistoryPort};
use crate::domain::replay::{ChunkWindow, CommitOutcome, FetchPlan, RawSample, ReplayEvent};
use crate::domain::sensor::{SensorCatalog, SensorRef};
use crate::infrastructure::metrics;

/// Sensors fetched concurrently within one chunk.
const SENSOR_FETCH_CONCURRENCY: usize = 8;

/// Producer loop of a replay session.
pub(crate) struct ChunkFetcher {
    shared: Arc<SessionShared>,
    catalog: Arc<SensorCatalog>,
    history: Arc<dyn HistoryPort>,
    retry: RetryPolicy,
}

impl ChunkFetcher {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        catalog: Arc<SensorCatalog>,
        history: Arc<dyn HistoryPort>,
    ) -> Self {
        let retry = RetryPolicy::new(shared.config.retry.clone());
        Self {
            shared,
            catalog,
            history,
            retry,
        }
    }

    /// Run until the session is cancelled.
    pub(crate) async fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;

        loop {
            if shared.cancel.is_cancelled() {
                break;
            }

            let plan = shared
                .schedule
                .lock()
                .plan_fetch(Utc::now(), config.look_ahead, config.chunk_length);

            match plan {
                FetchPlan::Exhausted => {
                    tracing::debug!("Virtual time reached the present, idling until seek");
                    tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        () = shared.rebased.notified() => self.retry.reset(),
                    }
                }
                FetchPlan::Backpressure { wait } => {
                    let nap = wait.min(config.backpressure_interval);
                    tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        () = shared.rebased.notified() => self.retry.reset(),
                        () = tokio::time::sleep(nap) => {}
                    }
                }
                FetchPlan::Fetch(window) => {
                    let fetched = tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        fetched = self.fetch_chunk(window) => fetched,
                    };

                    match fetched {
                        Ok(events) => {
                            self.retry.reset();
                            self.commit(window, events);
                        }
                        Err(e) => {
                            let delay = self.retry.next_delay();
                            metrics::record_fetch_failure();
                            tracing::error!(
                                error = %e,
                                window_start = %window.start,
                                window_end = %window.end,
                                attempt = self.retry.attempt_count(),
                                retry_in_ms = delay.as_millis(),
                                "Chunk fetch failed, retrying"
                            );
                            tokio::select! {
                                () = shared.cancel.cancelled() => break,
                                () = shared.rebased.notified() => self.retry.reset(),
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!("Chunk fetcher stopped");
    }

    /// Fetch every catalog sensor for `window`. Any sensor failing fails the
    /// whole chunk.
    async fn fetch_chunk(&self, window: ChunkWindow) -> Result<Vec<ReplayEvent>, HistoryError> {
        let started = Instant::now();
        let history = &self.history;

        let per_sensor: Vec<(&Arc<SensorRef>, Vec<RawSample>)> = stream::iter(self.catalog.iter())
            .map(|sensor| async move {
                match history.fetch_samples(sensor, window.start, window.end).await {
                    Ok(samples) => Ok((sensor, samples)),
                    Err(HistoryError::UnknownSensor(id)) => {
                        tracing::warn!(sensor = %id, "History source has no data for sensor");
                        Ok((sensor, Vec::new()))
                    }
                    Err(e) => Err(e),
                }
            })
            .buffered(SENSOR_FETCH_CONCURRENCY)
            .boxed()
            .try_collect()
            .await?;

        let events: Vec<ReplayEvent> = per_sensor
            .into_iter()
            .flat_map(|(sensor, samples)| {
                samples
                    .into_iter()
                    .filter_map(move |sample| self.to_event(sensor, &sample, &window))
            })
            .collect();

        metrics::record_chunk_fetched(started.elapsed());
        Ok(events)
    }

    /// Validate one sample. Invalid samples are logged and skipped.
    fn to_event(
        &self,
        requested: &Arc<SensorRef>,
        sample: &RawSample,
        window: &ChunkWindow,
    ) -> Option<ReplayEvent> {
        let (timestamp, value) = match sample.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(sensor = %requested.id, error = %e, "Skipping malformed sample");
                metrics::record_sample_skipped(metrics::SkipReason::Malformed);
                return None;
            }
        };

        let sensor = match sample.sensor.as_deref() {
            None => Arc::clone(requested),
            Some(declared) => match self.catalog.resolve(declared) {
                Ok(sensor) => sensor,
                Err(miss) => {
                    tracing::warn!(error = %miss, "Skipping sample for sensor outside catalog");
                    metrics::record_sample_skipped(metrics::SkipReason::UnknownSensor);
                    return None;
                }
            },
        };

        if !window.contains(timestamp) {
            tracing::debug!(
                sensor = %sensor.id,
                %timestamp,
                "Skipping sample outside the requested window"
            );
            metrics::record_sample_skipped(metrics::SkipReason::OutOfWindow);
            return None;
        }

        Some(ReplayEvent::new(sensor, timestamp, value))
    }

    fn commit(&self, window: ChunkWindow, events: Vec<ReplayEvent>) {
        let outcome = self.shared.schedule.lock().commit_chunk(window, events);

        match outcome {
            CommitOutcome::Committed { queued, horizon } => {
                metrics::record_events_queued(queued);
                if queued > 0 {
                    self.shared.queue_changed.notify_one();
                }
                tracing::info!(
                    window_start = %window.start,
                    %horizon,
                    queued,
                    "Chunk queued"
                );
            }
            CommitOutcome::Stale { discarded } => {
                metrics::record_stale_chunk();
                tracing::warn!(
                    window_start = %window.start,
                    generation = window.generation,
                    discarded,
                    "Discarding chunk fetched before a seek"
                );
            }
        }
    }
}

//! `HistoryPort` backed by the Chain API `scalar_data` collection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::hal::{ScalarDataPage, ScalarDatum};
use super::{ChainClient, ChainError};
use crate::application::ports::{HistoryError, HistoryPort};
use crate::domain::replay::RawSample;
use crate::domain::sensor::SensorRef;

/// Historical data source reading `scalar_data` pages.
#[derive(Debug, Clone)]
pub struct ChainHistory {
    client: ChainClient,
    api_url: String,
    max_pages: u32,
}

impl ChainHistory {
    /// Create a source for the API rooted at `api_url`.
    #[must_use]
    pub fn new(client: ChainClient, api_url: impl Into<String>, max_pages: u32) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            max_pages: max_pages.max(1),
        }
    }

    /// Query URL for `sensor` over `[start, end)`, in whole Unix seconds.
    #[must_use]
    pub fn data_url(&self, sensor: &SensorRef, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}/scalar_data/?sensor_id={}&timestamp__gte={}&timestamp__lt={}",
            self.api_url,
            sensor.history_key,
            start.timestamp(),
            end.timestamp()
        )
    }

    /// Read every page of one window. A window that does not fit in
    /// `max_pages` fails as a whole so the caller retries it.
    async fn fetch_pages(&self, first_url: String) -> Result<Vec<RawSample>, ChainError> {
        let mut samples = Vec::new();
        let mut next = Some(first_url.clone());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.max_pages {
                tracing::error!(
                    url = %first_url,
                    max_pages = self.max_pages,
                    "History window exceeds page limit"
                );
                return Err(ChainError::PageLimit {
                    url: first_url,
                    max_pages: self.max_pages,
                });
            }
            pages += 1;

            let page: ScalarDataPage = self.client.get_json(&url).await?;
            samples.extend(page.data.into_iter().map(RawSample::from));
            next = page.links.href("next").map(str::to_string);
        }

        Ok(samples)
    }
}

impl From<ScalarDatum> for RawSample {
    fn from(datum: ScalarDatum) -> Self {
        Self {
            sensor: datum.links.href("ch:sensor").map(str::to_string),
            timestamp: datum.timestamp,
            value: datum.value,
        }
    }
}

#[async_trait]
impl HistoryPort for ChainHistory {
    async fn fetch_samples(
        &self,
        sensor: &SensorRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, HistoryError> {
        let url = self.data_url(sensor, start, end);
        let samples = self.fetch_pages(url).await?;
        tracing::debug!(
            sensor = %sensor.id,
            %start,
            %end,
            samples = samples.len(),
            "Fetched sensor history"
        );
        Ok(samples)
    }

    fn name(&self) -> &str {
        "chain-api"
    }
}

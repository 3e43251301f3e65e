//! HTTP client wrapper with retry logic.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::ChainError;
use crate::application::services::{RetryConfig, RetryPolicy};

/// Attempts per request before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// HTTP client for the Chain API with retry logic.
#[derive(Debug, Clone)]
pub struct ChainClient {
    client: Client,
    retry: RetryConfig,
    max_attempts: u32,
}

impl ChainClient {
    /// Create a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            retry: RetryConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Override the retry behavior. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig, max_attempts: u32) -> Self {
        self.retry = retry;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Transport errors, 408, 429 and 5xx responses are retried with
    /// backoff; other failures return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] once retries are exhausted or on a
    /// non-retryable failure.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ChainError> {
        let mut backoff = RetryPolicy::new(self.retry.clone());

        loop {
            let error = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| ChainError::Transport(e.to_string()))?;
                        return serde_json::from_slice(&body).map_err(|e| ChainError::Decode {
                            url: url.to_string(),
                            reason: e.to_string(),
                        });
                    }

                    let error = ChainError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    };
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => ChainError::Transport(e.to_string()),
            };

            if backoff.attempt_count() + 1 >= self.max_attempts {
                return Err(error);
            }
            let delay = backoff.next_delay();
            tracing::warn!(
                %url,
                error = %error,
                attempt = backoff.attempt_count(),
                delay_ms = delay.as_millis(),
                "Chain API request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Whether a failed status is worth retrying.
const fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

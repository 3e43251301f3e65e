//! Service Configuration Settings
//!
//! Configuration types for the replay service, loaded from environment
//! variables. Unparsable values fall back to defaults; parsable but unusable
//! values are rejected.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Url;

use crate::application::services::{
    DEFAULT_START_UNIX, RetryConfig, SessionConfig, SessionConfigError,
};

/// Public Chain API deployment the replay was built against.
const DEFAULT_CHAIN_API_URL: &str = "http://chain-api.media.mit.edu";

/// Site replayed when `CHAIN_SITE_URL` is not set.
const DEFAULT_SITE_PATH: &str = "sites/7";

/// Chain API client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainApiSettings {
    /// API base URL.
    pub api_url: String,
    /// Site whose sensors are replayed.
    pub site_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Maximum pages followed per history request.
    pub max_pages: u32,
}

impl Default for ChainApiSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CHAIN_API_URL.to_string(),
            site_url: format!("{DEFAULT_CHAIN_API_URL}/{DEFAULT_SITE_PATH}"),
            request_timeout: Duration::from_secs(30),
            max_pages: 100,
        }
    }
}

impl ChainApiSettings {
    /// Collection URL of scalar data, used as `_links.self.href` of
    /// outbound events.
    #[must_use]
    pub fn scalar_data_url(&self) -> String {
        format!("{}/scalar_data/", self.api_url.trim_end_matches('/'))
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Websocket replay port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8765,
            health_port: 8082,
        }
    }
}

/// Defaults applied to every replay session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySettings {
    /// Start time when a consumer does not ask for one.
    pub default_start: DateTime<Utc>,
    /// Speed when a consumer does not ask for one.
    pub scale: f64,
    /// Look-ahead window.
    pub look_ahead: TimeDelta,
    /// Chunk length.
    pub chunk_length: TimeDelta,
    /// Dispatcher polling interval.
    pub poll_interval: Duration,
    /// Fetcher backpressure interval.
    pub backpressure_interval: Duration,
    /// Fetch retry backoff.
    pub retry: RetryConfig,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            default_start: session.start,
            scale: session.scale,
            look_ahead: session.look_ahead,
            chunk_length: session.chunk_length,
            poll_interval: session.poll_interval,
            backpressure_interval: session.backpressure_interval,
            retry: session.retry,
        }
    }
}

impl ReplaySettings {
    /// Session configuration for a consumer, using defaults for anything it
    /// did not specify.
    #[must_use]
    pub fn session_config(&self, start: Option<DateTime<Utc>>, scale: Option<f64>) -> SessionConfig {
        SessionConfig {
            start: start.unwrap_or(self.default_start),
            scale: scale.unwrap_or(self.scale),
            look_ahead: self.look_ahead,
            chunk_length: self.chunk_length,
            poll_interval: self.poll_interval,
            backpressure_interval: self.backpressure_interval,
            retry: self.retry.clone(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Chain API settings.
    pub chain: ChainApiSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Replay session defaults.
    pub replay: ReplaySettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but cannot be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but cannot be used.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let chain_defaults = ChainApiSettings::default();
        let api_url = vars("CHAIN_API_URL")
            .filter(|v| !v.trim().is_empty())
            .map_or(chain_defaults.api_url, |v| v.trim().trim_end_matches('/').to_string());
        let site_url = vars("CHAIN_SITE_URL")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(
                || format!("{api_url}/{DEFAULT_SITE_PATH}"),
                |v| v.trim().to_string(),
            );

        let chain = ChainApiSettings {
            request_timeout: parse_duration_secs(
                &vars,
                "CHAIN_HTTP_TIMEOUT_SECS",
                chain_defaults.request_timeout,
            ),
            max_pages: parse_or(&vars, "CHAIN_MAX_PAGES", chain_defaults.max_pages),
            api_url,
            site_url,
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: parse_or(&vars, "HISTORY_REPLAY_PORT", server_defaults.ws_port),
            health_port: parse_or(
                &vars,
                "HISTORY_REPLAY_HEALTH_PORT",
                server_defaults.health_port,
            ),
        };

        let replay_defaults = ReplaySettings::default();
        let retry_defaults = replay_defaults.retry.clone();
        let default_start = parse_or(&vars, "REPLAY_DEFAULT_START", DEFAULT_START_UNIX);
        let replay = ReplaySettings {
            default_start: DateTime::from_timestamp(default_start, 0)
                .ok_or(ConfigError::OutOfRange("REPLAY_DEFAULT_START"))?,
            scale: parse_or(&vars, "REPLAY_SCALE", replay_defaults.scale),
            look_ahead: parse_delta_secs(
                &vars,
                "REPLAY_LOOK_AHEAD_SECS",
                replay_defaults.look_ahead,
            ),
            chunk_length: parse_delta_secs(
                &vars,
                "REPLAY_CHUNK_LENGTH_SECS",
                replay_defaults.chunk_length,
            ),
            poll_interval: parse_duration_millis(
                &vars,
                "REPLAY_POLL_INTERVAL_MS",
                replay_defaults.poll_interval,
            ),
            backpressure_interval: parse_duration_millis(
                &vars,
                "REPLAY_BACKPRESSURE_INTERVAL_MS",
                replay_defaults.backpressure_interval,
            ),
            retry: RetryConfig {
                initial_delay: parse_duration_millis(
                    &vars,
                    "REPLAY_RETRY_INITIAL_MS",
                    retry_defaults.initial_delay,
                ),
                max_delay: parse_duration_secs(
                    &vars,
                    "REPLAY_RETRY_MAX_SECS",
                    retry_defaults.max_delay,
                ),
                multiplier: parse_or(&vars, "REPLAY_RETRY_MULTIPLIER", retry_defaults.multiplier),
                jitter_factor: retry_defaults.jitter_factor,
            },
        };

        let config = Self {
            chain,
            server,
            replay,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("CHAIN_API_URL", &self.chain.api_url),
            ("CHAIN_SITE_URL", &self.chain.site_url),
        ] {
            Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.chain.max_pages == 0 {
            return Err(ConfigError::Zero("CHAIN_MAX_PAGES"));
        }

        self.replay.session_config(None, None).validate()?;
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// URL variable does not hold a valid absolute URL.
    #[error("{key} is not a valid URL ({value:?}): {reason}")]
    InvalidUrl {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// Variable must be non-zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// Variable outside the representable range.
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
    /// Replay defaults do not form a valid session.
    #[error("invalid replay defaults: {0}")]
    Replay(#[from] SessionConfigError),
}

fn parse_or<T: std::str::FromStr>(
    vars: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    vars(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    vars: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    vars(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    vars: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    vars(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_delta_secs(
    vars: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: TimeDelta,
) -> TimeDelta {
    vars(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.chain, ChainApiSettings::default());
        assert_eq!(config.chain.site_url, "http://chain-api.media.mit.edu/sites/7");
        assert_eq!(config.server, ServerSettings::default());
        assert_eq!(config.replay, ReplaySettings::default());
        assert_eq!(config.replay.default_start.timestamp(), 1_401_926_400);
    }

    #[test]
    fn site_follows_api_url() {
        let config = config_from(&[("CHAIN_API_URL", "http://localhost:8000/")]).unwrap();
        assert_eq!(config.chain.api_url, "http://localhost:8000");
        assert_eq!(config.chain.site_url, "http://localhost:8000/sites/7");
        assert_eq!(
            config.chain.scalar_data_url(),
            "http://localhost:8000/scalar_data/"
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CHAIN_SITE_URL", "http://localhost:8000/sites/12"),
            ("CHAIN_MAX_PAGES", "5"),
            ("HISTORY_REPLAY_PORT", "9000"),
            ("REPLAY_DEFAULT_START", "1402000000"),
            ("REPLAY_SCALE", "10"),
            ("REPLAY_LOOK_AHEAD_SECS", "60"),
            ("REPLAY_CHUNK_LENGTH_SECS", "120"),
            ("REPLAY_POLL_INTERVAL_MS", "20"),
            ("REPLAY_RETRY_INITIAL_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.chain.site_url, "http://localhost:8000/sites/12");
        assert_eq!(config.chain.max_pages, 5);
        assert_eq!(config.server.ws_port, 9000);
        assert_eq!(config.replay.default_start.timestamp(), 1_402_000_000);
        assert!((config.replay.scale - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.replay.look_ahead, TimeDelta::seconds(60));
        assert_eq!(config.replay.chunk_length, TimeDelta::seconds(120));
        assert_eq!(config.replay.poll_interval, Duration::from_millis(20));
        assert_eq!(config.replay.retry.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = config_from(&[
            ("HISTORY_REPLAY_PORT", "not-a-port"),
            ("REPLAY_SCALE", "fast"),
        ])
        .unwrap();
        assert_eq!(config.server.ws_port, 8765);
        assert!((config.replay.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unusable_values_are_rejected() {
        assert!(matches!(
            config_from(&[("REPLAY_SCALE", "0")]),
            Err(ConfigError::Replay(SessionConfigError::InvalidScale(_)))
        ));
        assert!(matches!(
            config_from(&[("REPLAY_CHUNK_LENGTH_SECS", "0")]),
            Err(ConfigError::Replay(SessionConfigError::NonPositiveChunkLength))
        ));
        assert!(matches!(
            config_from(&[("REPLAY_RETRY_INITIAL_MS", "0")]),
            Err(ConfigError::Replay(SessionConfigError::ZeroRetryDelay))
        ));
        assert!(matches!(
            config_from(&[("REPLAY_RETRY_MAX_SECS", "0")]),
            Err(ConfigError::Replay(SessionConfigError::RetryMaxBelowInitial))
        ));
        assert!(matches!(
            config_from(&[("REPLAY_RETRY_MULTIPLIER", "0")]),
            Err(ConfigError::Replay(SessionConfigError::InvalidRetryMultiplier(_)))
        ));
        assert!(matches!(
            config_from(&[("REPLAY_RETRY_MULTIPLIER", "-1.5")]),
            Err(ConfigError::Replay(SessionConfigError::InvalidRetryMultiplier(_)))
        ));
        assert!(matches!(
            config_from(&[("CHAIN_MAX_PAGES", "0")]),
            Err(ConfigError::Zero("CHAIN_MAX_PAGES"))
        ));
        assert!(matches!(
            config_from(&[("CHAIN_SITE_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { key: "CHAIN_SITE_URL", .. })
        ));
    }

    #[test]
    fn session_config_uses_defaults_for_missing_fields() {
        let settings = ReplaySettings::default();
        let start = DateTime::from_timestamp(1_402_000_000, 0).unwrap();

        let config = settings.session_config(Some(start), None);
        assert_eq!(config.start, start);
        assert!((config.scale - settings.scale).abs() < f64::EPSILON);

        let config = settings.session_config(None, Some(4.0));
        assert_eq!(config.start, settings.default_start);
        assert!((config.scale - 4.0).abs() < f64::EPSILON);
    }
}

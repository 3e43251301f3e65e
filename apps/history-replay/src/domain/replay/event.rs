//! Replay events and the raw samples they are parsed from.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SampleError;
use crate::domain::sensor::SensorRef;

/// Naive layouts accepted after RFC 3339; interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One recorded reading scheduled for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvent {
    /// Sensor the reading belongs to.
    pub sensor: Arc<SensorRef>,
    /// Absolute virtual time of the reading.
    pub timestamp: DateTime<Utc>,
    /// Reading value.
    pub value: f64,
}

impl ReplayEvent {
    /// Create a new event.
    #[must_use]
    pub const fn new(sensor: Arc<SensorRef>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            sensor,
            timestamp,
            value,
        }
    }
}

/// A sample as returned by the historical data source, before validation.
///
/// Fields stay untyped so a single malformed sample can be skipped without
/// failing the whole chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Reading time, normally an ISO-8601 string.
    #[serde(default)]
    pub timestamp: serde_json::Value,
    /// Reading value, normally a JSON number.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Sensor the sample declares it belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
}

impl RawSample {
    /// Create a sample from an ISO-8601 timestamp and a numeric value.
    #[must_use]
    pub fn new(timestamp: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: serde_json::Value::String(timestamp.into()),
            value: serde_json::json!(value),
            sensor: None,
        }
    }

    /// Declare the sensor this sample belongs to.
    #[must_use]
    pub fn with_sensor(mut self, sensor: impl Into<String>) -> Self {
        self.sensor = Some(sensor.into());
        self
    }

    /// Parse the timestamp and value.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError`] if either field cannot be interpreted.
    pub fn parse(&self) -> Result<(DateTime<Utc>, f64), SampleError> {
        let timestamp = match &self.timestamp {
            serde_json::Value::String(s) => parse_timestamp(s)?,
            other => return Err(SampleError::Timestamp(other.to_string())),
        };
        let value = match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| SampleError::Value(self.value.to_string()))?;

        Ok((timestamp, value))
    }
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive times are UTC.
///
/// # Errors
///
/// Returns [`SampleError::Timestamp`] if no supported layout matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SampleError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SampleError::Timestamp(raw.to_string()))
}

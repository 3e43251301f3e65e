//! Sensor Catalog
//!
//! Explicit mapping from sensor identifier to sensor reference. Lookups that
//! miss return [`LookupMiss`] instead of a sentinel, so callers decide what a
//! miss means at the point of use.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Sensor Identity
// =============================================================================

/// Opaque sensor identifier (the sensor's canonical URL in the Chain API).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    /// Create a new sensor identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last non-empty path segment, e.g. `42` for `http://host/sensors/42/`.
    #[must_use]
    pub fn trailing_segment(&self) -> &str {
        self.0
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sensor known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRef {
    /// Canonical identifier.
    pub id: SensorId,
    /// Metric measured by the sensor (e.g. "temperature").
    pub metric: String,
    /// Index of the device the sensor is mounted on, if known.
    pub device_index: Option<usize>,
    /// Key the historical data source uses to address this sensor.
    pub history_key: String,
}

impl SensorRef {
    /// Create a sensor reference whose history key is the trailing URL segment.
    #[must_use]
    pub fn new(id: SensorId, metric: impl Into<String>) -> Self {
        let history_key = id.trailing_segment().to_string();
        Self {
            id,
            metric: metric.into(),
            device_index: None,
            history_key,
        }
    }

    /// Attach the owning device index.
    #[must_use]
    pub const fn with_device(mut self, device_index: usize) -> Self {
        self.device_index = Some(device_index);
        self
    }
}

/// A sensor identifier that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sensor not in catalog: {0}")]
pub struct LookupMiss(pub String);

// =============================================================================
// Catalog
// =============================================================================

/// Immutable-after-build set of sensors a replay session tracks.
///
/// Iteration order is insertion order, so chunk fetches walk the sensors
/// deterministically.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<Arc<SensorRef>>,
    index: HashMap<SensorId, usize>,
}

impl SensorCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sensor, replacing any previous entry with the same id.
    pub fn insert(&mut self, sensor: SensorRef) {
        if let Some(&position) = self.index.get(&sensor.id) {
            self.sensors[position] = Arc::new(sensor);
        } else {
            self.index.insert(sensor.id.clone(), self.sensors.len());
            self.sensors.push(Arc::new(sensor));
        }
    }

    /// Resolve a sensor by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LookupMiss`] if the identifier is unknown.
    pub fn resolve(&self, id: &str) -> Result<Arc<SensorRef>, LookupMiss> {
        self.index
            .get(&SensorId::new(id))
            .map(|&position| Arc::clone(&self.sensors[position]))
            .ok_or_else(|| LookupMiss(id.to_string()))
    }

    /// Iterate over all sensors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SensorRef>> {
        self.sensors.iter()
    }

    /// Number of sensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensor count per metric, sorted by metric name.
    #[must_use]
    pub fn metric_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sensor in &self.sensors {
            *counts.entry(sensor.metric.as_str()).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(metric, count)| (metric.to_string(), count))
            .collect();
        counts.sort();
        counts
    }
}

impl FromIterator<SensorRef> for SensorCatalog {
    fn from_iter<I: IntoIterator<Item = SensorRef>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for sensor in iter {
            catalog.insert(sensor);
        }
        catalog
    }
}

//! Outbound websocket message format.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::domain::replay::ReplayEvent;

/// A HAL link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Href {
    /// Target URL.
    pub href: String,
}

/// Links attached to every replayed reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayLinks {
    /// The scalar data collection the reading came from.
    #[serde(rename = "self")]
    pub self_link: Href,
    /// The sensor that recorded it.
    pub sensor: Href,
}

/// One delivered reading, as sent to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayMessage {
    /// ISO-8601 reading time.
    pub timestamp: String,
    /// Reading value.
    pub value: f64,
    /// HAL links.
    #[serde(rename = "_links")]
    pub links: ReplayLinks,
}

impl ReplayMessage {
    /// Build the message for `event`.
    #[must_use]
    pub fn from_event(event: &ReplayEvent, scalar_data_url: &str) -> Self {
        Self {
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            value: event.value,
            links: ReplayLinks {
                self_link: Href {
                    href: scalar_data_url.to_string(),
                },
                sensor: Href {
                    href: event.sensor.id.to_string(),
                },
            },
        }
    }
}

//! Chain API Adapter
//!
//! HTTP/HAL client for the Chain sensor API: discovers the sensor catalog
//! of a site and serves recorded readings as a [`HistoryPort`].
//!
//! [`HistoryPort`]: crate::application::ports::HistoryPort

mod catalog;
mod client;
pub mod hal;
mod history;

pub use catalog::discover_catalog;
pub use client::ChainClient;
pub use history::ChainHistory;

use crate::application::ports::HistoryError;

/// Chain API errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Network or transport failure.
    #[error("chain API transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("chain API request to {url} failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Body was not the expected JSON.
    #[error("chain API response from {url} could not be decoded: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder message.
        reason: String,
    },

    /// A required HAL link is absent.
    #[error("document {url} has no {rel} link")]
    MissingLink {
        /// Document URL.
        url: String,
        /// Missing relation.
        rel: &'static str,
    },

    /// Paged collection still had a `next` link after the page cap.
    #[error("{url} has more than {max_pages} pages")]
    PageLimit {
        /// First page of the collection.
        url: String,
        /// Configured page cap.
        max_pages: u32,
    },
}

impl From<ChainError> for HistoryError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transport(message) => Self::Transport(message),
            ChainError::Status { status, url } => Self::Status { status, url },
            ChainError::Decode { url, reason } => Self::Decode(format!("{url}: {reason}")),
            ChainError::MissingLink { url, rel } => {
                Self::Decode(format!("document {url} has no {rel} link"))
            }
            ChainError::PageLimit { url, max_pages } => Self::PageLimit { url, max_pages },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_errors_map_to_history_errors() {
        assert_eq!(
            HistoryError::from(ChainError::Transport("reset".to_string())),
            HistoryError::Transport("reset".to_string())
        );
        assert_eq!(
            HistoryError::from(ChainError::Status {
                status: 503,
                url: "http://api/x".to_string()
            }),
            HistoryError::Status {
                status: 503,
                url: "http://api/x".to_string()
            }
        );
        assert!(matches!(
            HistoryError::from(ChainError::MissingLink {
                url: "http://api/sites/7".to_string(),
                rel: "ch:devices"
            }),
            HistoryError::Decode(_)
        ));
        assert_eq!(
            HistoryError::from(ChainError::PageLimit {
                url: "http://api/scalar_data/".to_string(),
                max_pages: 2
            }),
            HistoryError::PageLimit {
                url: "http://api/scalar_data/".to_string(),
                max_pages: 2
            }
        );
    }
}

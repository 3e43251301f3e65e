//! Websocket Streaming Transport
//!
//! Thin transport around the replay scheduler: one session per connection,
//! JSON text frames out, seek commands in.
//!
//! # Protocol
//!
//! - `GET /?start=<epoch>&scale=<speed>` upgrades to a websocket; both
//!   parameters are optional and invalid values are answered with 400.
//! - Outbound: one [`ReplayMessage`] per delivered reading.
//! - Inbound: a bare Unix epoch, or `{"seek": <epoch>, "scale": <speed>}`.
//!   Anything else is logged and ignored.

mod messages;
mod server;
mod sink;

pub use messages::{Href, ReplayLinks, ReplayMessage};
pub use server::{ReplayQuery, ReplayServer};
pub use sink::WebSocketSink;

/// Replay server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

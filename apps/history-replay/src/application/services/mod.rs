//! Application Services
//!
//! The replay scheduler. Each consumer gets a [`ReplaySession`] running
//! three cooperating loops over one shared schedule:
//!
//! - `ChunkFetcher`: keeps the queue stocked within the look-ahead window
//! - `Dispatcher`: delivers events once the pseudo clock reaches them
//! - `SeekController`: drains and rebases on consumer seeks

mod dispatcher;
mod fetcher;
pub mod retry;
mod seek;
mod session;

pub use retry::{RetryConfig, RetryPolicy};
pub use seek::{SeekCommand, SeekError};
pub use session::{
    DEFAULT_START_UNIX, ReplaySession, SessionConfig, SessionConfigError, SessionHandle,
};

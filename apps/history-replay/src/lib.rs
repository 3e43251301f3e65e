#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! History Replay - Sensor Timeline Streaming
//!
//! A websocket service that replays recorded sensor readings to each
//! connected consumer as if they were happening live. Every consumer gets
//! its own pseudo clock, so playback speed and seek position are per
//! connection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Replay scheduling with no I/O
//!   - `replay`: Pseudo clock, replay queue and the fetch/delivery schedule
//!   - `sensor`: Sensor references and the sensor catalog
//!
//! - **Application**: Replay loops and port definitions
//!   - `ports`: History source and event sink interfaces
//!   - `services`: Chunk fetcher, dispatcher, seek controller, sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `chain`: Chain API client and catalog discovery
//!   - `history`: In-memory history source
//!   - `websocket`: Replay server and socket sink
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐  chunks   ┌──────────────┐
//! Chain API ──────────►│ ChunkFetcher │──────────►│ ReplayQueue  │
//!                      └──────────────┘           └──────┬───────┘
//!                             ▲                          │ due events
//!                             │ rebase                   ▼
//!   seek frames ──────► SeekController            ┌──────────────┐
//!                                                 │  Dispatcher  │──► consumer
//!                                                 └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Replay scheduling types with no external dependencies.
pub mod domain;

/// Application layer - Replay loops and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::replay::{
    ChunkWindow, ClockError, PseudoClock, RawSample, ReplayEvent, ReplayQueue, SampleError,
    Schedule, ScheduleSnapshot,
};
pub use domain::sensor::{SensorCatalog, SensorId, SensorRef};

// Ports
pub use application::ports::{EventSink, HistoryError, HistoryPort, SinkError};

// Replay sessions
pub use application::services::{
    ReplaySession, RetryConfig, SeekCommand, SeekError, SessionConfig, SessionConfigError,
    SessionHandle,
};

// Infrastructure config
pub use infrastructure::config::{
    ChainApiSettings, ConfigError, ReplaySettings, ServerSettings, ServiceConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Chain API
pub use infrastructure::chain::{ChainClient, ChainError, ChainHistory, discover_catalog};

// History sources (for integration tests)
pub use infrastructure::history::{HistoryRequest, InMemoryHistory};

// Websocket server
pub use infrastructure::websocket::{ReplayMessage, ReplayServer, ServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

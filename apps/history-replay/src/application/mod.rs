//! Application Layer - Replay loops and port definitions.
//!
//! This layer contains the per-session replay services and the port
//! interfaces that connect them to the historical data source and the
//! streaming consumer.

/// Port interfaces for external systems (history source, event sink).
pub mod ports;

/// Replay session services: fetcher, dispatcher, seek controller.
pub mod services;

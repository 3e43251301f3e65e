//! Configuration Module
//!
//! Configuration loading for the replay service.

mod settings;

pub use settings::{ChainApiSettings, ConfigError, ReplaySettings, ServerSettings, ServiceConfig};

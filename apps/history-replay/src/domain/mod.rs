//! Domain Layer - Replay scheduling types and business logic.
//!
//! This layer contains the virtual clock, the time-ordered event queue and
//! the sensor catalog. Nothing here performs I/O; the loops that drive these
//! types live in the application layer.

/// Virtual clock, replay queue and the shared fetch/delivery schedule.
pub mod replay;

/// Sensor references and the per-session sensor catalog.
pub mod sensor;

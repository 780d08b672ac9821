//! Backend health monitoring.
//!
//! A single probe thread periodically checks every registered backend,
//! keeps a bounded history of boolean probe results, and derives a
//! hysteresis-smoothed status from the recent history. Consumers (the WAL
//! processor, operators) read snapshots; an optional callback fires exactly
//! when a backend's derived status changes.
//!
//! ## Status derivation
//!
//! With at least 3 recorded probes, the last 3 decide: all healthy ⇒
//! `Online`, none healthy ⇒ `Offline`, mixed ⇒ `Degraded`. With fewer than
//! 3 probes the status mirrors the latest probe. With no history the status
//! is `Unknown`. This requires sustained evidence before a backend flips
//! state, so a single flaky probe degrades rather than kills a backend.

pub mod monitor;
pub mod probe;

pub use monitor::{BackendHealth, BackendState, HealthMonitor, MonitorOptions};
pub use probe::{FnProbe, LocalPathProbe, Probe};

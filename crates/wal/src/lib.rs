//! Write-ahead log for storage operations.
//!
//! The WAL durably records every storage operation before it is attempted,
//! so work survives process crashes and backend outages. Two halves:
//!
//! - [`store`]: the durable, partitioned log itself. Append, indexed
//!   lookup, status updates with transition validation, archival of
//!   completed rows, cleanup, statistics.
//! - [`processor`]: the scheduler. A worker thread that finds pending
//!   work, consults the health monitor, dispatches to backend handlers,
//!   and drives the retry/backoff lifecycle.
//!
//! Partitions and archives are whole files rewritten atomically
//! (write-new-then-rename); readers never observe a half-written file, and
//! a crash between rename and anything else leaves either the old or the
//! new content, both valid.

pub mod handler;
pub mod partition;
pub mod processor;
pub mod store;
pub mod telemetry;
pub mod testing;

pub use handler::{BackendHandler, HandlerOutcome, HandlerRegistry};
pub use processor::{ProcessorOptions, WalProcessor};
pub use store::{CleanupReport, StatusUpdate, WalOptions, WalStatistics, WalStore};
pub use telemetry::{TelemetryBucket, WalTelemetry};

//! Core types for the Stowage storage substrate.
//!
//! This crate defines the shared vocabulary used by every other layer:
//! operations and their status machine, backend kinds, the unified error
//! type with stable wire-level error kinds, configuration, and time helpers.
//!
//! Nothing here performs I/O. Higher layers (WAL, bridge, daemon) depend on
//! this crate; it depends on nothing but serialization support.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{CompressionCodec, Config, PartitionFormat};
pub use error::{Error, ErrorKind, Result};
pub use time::now_ms;
pub use types::{
    Backend, ContentReference, Operation, OperationResult, OperationStatus, OperationType,
};

//! Columnar engine for Stowage.
//!
//! One crate owns all Parquet expertise: the in-memory [`Table`] model, the
//! schema with its stable fingerprint, filter evaluation, and the encode /
//! decode paths used by both the WAL (operation partitions) and the columnar
//! bridge (content-addressed datasets). Both layers therefore share one
//! on-disk format, one compression configuration, and one reader.
//!
//! ## Layout
//!
//! - [`table`]: typed columns (`Utf8`, `Int64`, `Float64`, `Bool`) with
//!   per-cell nullability, projection, slicing, sorting.
//! - [`schema`]: field list, canonical text rendering, sha256 fingerprint.
//! - [`filter`]: comparison predicates applied during scans.
//! - [`write`]: low-level Parquet writing. Dictionary encoding, row-group
//!   sizing, compression, hive-style partition directories, size-bounded
//!   chunking.
//! - [`read`]: Parquet reading with column projection pushdown and
//!   row-level filter application during the scan.
//! - [`records`]: the WAL operation record schema (map and struct columns)
//!   plus the line-delimited JSON fallback codec.

pub mod filter;
pub mod read;
pub mod records;
pub mod schema;
pub mod table;
pub mod write;

pub use filter::{CmpOp, Filter, Scalar};
pub use read::{read_table, read_table_partitioned, ReadOptions};
pub use schema::{ColumnType, Field, Schema};
pub use table::{Cell, Column, ColumnData, Table};
pub use write::{
    write_table, write_table_chunked, write_table_partitioned, write_table_to_vec, WriteOptions,
};

use stowage_core::Error;

/// Map a Parquet error into the shared error type.
///
/// Parquet failures surface as serialization errors; corrupt files are
/// detected by callers via this same path and quarantined.
pub(crate) fn pq_err(e: parquet::errors::ParquetError) -> Error {
    Error::Serialization(format!("parquet: {e}"))
}

//! # Stowage
//!
//! A content-addressed multi-backend storage substrate: a durable
//! write-ahead log of storage operations, a backend health monitor, a
//! content-addressed columnar bridge with a virtual-filesystem view, and a
//! lock-file supervisor for the local content-addressed daemon.
//!
//! # Quick start
//!
//! ```no_run
//! use stowage::{Config, Stowage};
//! use stowage::{Backend, Operation, OperationType};
//!
//! fn main() -> stowage::Result<()> {
//!     let stowage = Stowage::open(Config::rooted("./stowage-data"))?;
//!
//!     // queue a storage operation; the processor dispatches it when the
//!     // backend is online
//!     let op = stowage.append_operation(
//!         Operation::new(OperationType::Pin, Backend::Ipfs)
//!             .with_parameter("cid", "bafyexample")
//!             .with_max_retries(5),
//!     )?;
//!     println!("queued {}", op.operation_id);
//!
//!     // store a table as a content-addressed artifact
//!     use stowage::columnar::{Column, ColumnData, Table};
//!     let table = Table::from_columns(vec![Column::new(
//!         "n",
//!         ColumnData::Int64(vec![Some(1), Some(2)]),
//!     )])?;
//!     let receipt = stowage.bridge().store(&table, Some("numbers"), None, None)?;
//!     println!("stored as {}", receipt.cid);
//!
//!     stowage.close();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `stowage-core` | Types, status machine, errors, config |
//! | `stowage-columnar` | Table model + Parquet codec (shared by WAL and bridge) |
//! | `stowage-health` | Probe thread, hysteresis status, change callbacks |
//! | `stowage-wal` | Partitioned durable log + dispatch scheduler |
//! | `stowage-daemon` | `repo.lock` supervision + secure subprocess layer |
//! | `stowage-bridge` | Content-addressed datasets, query, VFS facade |
//! | `stowage-client` | Normalized add/cat/pin vocabulary over real or simulated clients |
//! | `stowage-deals` | Storage-market deal placement and monitoring behind a narrow chain API |
//!
//! The [`Stowage`] struct wires the components together; each is also
//! usable on its own through the re-exported crates.

mod facade;

pub use facade::{global, init_global, shutdown_global, Stowage};

pub use stowage_core::{
    Backend, CompressionCodec, Config, ContentReference, Error, ErrorKind, Operation,
    OperationResult, OperationStatus, OperationType, PartitionFormat, Result,
};

pub use stowage_bridge::{
    BridgeOptions, ColumnarBridge, DatasetMetadata, StoreReceipt, VirtualFileSystem,
};
pub use stowage_client::{
    ContentClient, ContentClientHandler, DaemonClient, NormalizedClient, SimulatedClient,
};
pub use stowage_daemon::{DaemonStartReport, DaemonSupervisor, SupervisorOptions};
pub use stowage_deals::{
    DealInfo, DealManager, DealPolicy, DealState, MockMarketApi, StorageMarketApi,
};
pub use stowage_health::{BackendState, HealthMonitor, MonitorOptions};
pub use stowage_wal::{
    BackendHandler, HandlerOutcome, HandlerRegistry, WalProcessor, WalStore, WalTelemetry,
};

/// Columnar building blocks (tables, schemas, filters).
pub mod columnar {
    pub use stowage_columnar::{
        Cell, CmpOp, Column, ColumnData, ColumnType, Field, Filter, Scalar, Schema, Table,
    };
}

/// Install a process-wide tracing subscriber with sensible defaults.
///
/// Optional convenience for binaries and tests; libraries never call this.
/// Safe to call more than once (later calls are no-ops).
pub fn init_tracing() {
    use tracing_subscriber::util::SubscriberInitExt;
    let _ = tracing_subscriber::fmt().with_target(false).finish().try_init();
}

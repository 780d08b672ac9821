//! Content-addressed columnar bridge.
//!
//! Tables go in, deterministic CIDs come out. Each stored dataset is a
//! Parquet artifact (single file, hive-partitioned directory, or
//! size-bounded chunk directory) plus a JSON sidecar that is the durable
//! source of truth for its metadata. An in-process index maps CID ↔ path
//! and is rebuilt from the sidecars on open.
//!
//! The bridge integrates with the rest of the substrate at explicit seams:
//! stores can be journaled through the WAL, a replication sink can be
//! notified of dataset lifecycle events, and a bounded LRU cache
//! short-circuits repeated metadata lookups. A read-only virtual
//! filesystem facade ([`vfs`]) exposes datasets, sidecars, and cached
//! query results as paths.

pub mod bridge;
pub mod cache;
pub mod cid;
pub mod query;
pub mod replication;
pub mod sidecar;
pub mod vfs;

pub use bridge::{
    BridgeOptions, ColumnarBridge, DatasetSummary, RetrieveResult, StorageStats, StoreReceipt,
};
pub use cache::MetadataCache;
pub use replication::{NoopSink, RecordingSink, ReplicationEvent, ReplicationSink};
pub use sidecar::{DatasetLayout, DatasetMetadata};
pub use vfs::{FileInfo, FileKind, VfsFile, VirtualFileSystem};

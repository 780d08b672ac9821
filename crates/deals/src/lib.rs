//! Long-term storage-market coordination.
//!
//! Content pinned locally is only as durable as the machine it sits on;
//! this crate places it with storage-market miners for paid, time-bounded
//! redundancy. The chain itself is out of scope: everything goes through
//! the narrow [`StorageMarketApi`] trait, and the deterministic
//! [`MockMarketApi`] shares that contract with any real client.
//!
//! - [`api`]: the narrow market interface, deal and miner types, and the
//!   mock implementation.
//! - [`manager`]: miner selection, redundant deal placement, cost
//!   estimation, deal tracking, content health.
//! - [`monitor`]: background refresh of tracked deals with state-change
//!   callbacks.
//! - [`handler`]: the WAL backend handler that turns `upload`/`add`/`pin`
//!   operations into market deals.

pub mod api;
pub mod handler;
pub mod manager;
pub mod monitor;

pub use api::{DealInfo, DealState, MinerInfo, MockMarketApi, NetworkStats, StorageMarketApi};
pub use handler::MarketHandler;
pub use manager::{
    ContentHealth, CostEstimate, DealManager, DealPolicy, MinerAnalysis, MinerFilter,
    RedundantStoreReport,
};
pub use monitor::{DealMonitor, MonitorHandle};

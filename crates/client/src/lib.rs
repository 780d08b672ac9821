//! Method normalization over heterogeneous content clients.
//!
//! Different backend clients expose different surfaces; this crate
//! presents one stable vocabulary (`add`, `cat`, `pin`, `unpin`,
//! `list_pins`, `id`, `object_stat`, `add_metadata`) behind the
//! [`ContentClient`] capability trait. Two implementations ship:
//!
//! - [`DaemonClient`] delegates to the local daemon's CLI through the
//!   secure subprocess layer.
//! - [`SimulatedClient`] synthesizes contract-shaped results, each marked
//!   `simulated: true`, for environments without a live daemon.
//!
//! The implementation is chosen at construction time; nothing probes
//! methods reflectively at call time. [`NormalizedClient`] wraps either
//! and records per-operation counts, success/failure tallies, and latency
//! summaries.

pub mod client;
pub mod daemon_client;
pub mod handler;
pub mod simulated;
pub mod stats;

pub use client::{
    AddMetadataResponse, AddResponse, CatResponse, ContentClient, IdResponse, ListPinsResponse,
    ObjectStatResponse, PinResponse,
};
pub use daemon_client::DaemonClient;
pub use handler::ContentClientHandler;
pub use simulated::SimulatedClient;
pub use stats::{ClientStats, NormalizedClient, OperationStats};

//! The stable operation vocabulary and its response shapes.
//!
//! Every response carries `success` and a `simulated` marker; simulated
//! results are shaped identically to real ones so consumers cannot tell
//! them apart structurally, only by the marker.

use serde::Serialize;
use std::collections::BTreeMap;
use stowage_core::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddResponse {
    pub success: bool,
    pub cid: String,
    pub size: u64,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatResponse {
    pub success: bool,
    pub data: Vec<u8>,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinResponse {
    pub success: bool,
    pub cid: String,
    pub pinned: bool,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListPinsResponse {
    pub success: bool,
    pub pins: Vec<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdResponse {
    pub success: bool,
    pub peer_id: String,
    pub addresses: Vec<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStatResponse {
    pub success: bool,
    pub cid: String,
    pub size: u64,
    pub num_links: u64,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddMetadataResponse {
    pub success: bool,
    pub cid: String,
    pub keys: Vec<String>,
    pub simulated: bool,
}

/// Capability trait over a content-addressed backend client.
///
/// Implementations are selected when the system is wired together; the
/// trait is object-safe so callers hold `Arc<dyn ContentClient>`.
pub trait ContentClient: Send + Sync {
    /// Store raw content, returning its CID.
    fn add(&self, content: &[u8]) -> Result<AddResponse>;
    /// Fetch content by CID.
    fn cat(&self, cid: &str) -> Result<CatResponse>;
    /// Pin a CID so it survives garbage collection.
    fn pin(&self, cid: &str) -> Result<PinResponse>;
    /// Remove a pin.
    fn unpin(&self, cid: &str) -> Result<PinResponse>;
    /// List currently pinned CIDs.
    fn list_pins(&self) -> Result<ListPinsResponse>;
    /// Identity of the underlying node.
    fn id(&self) -> Result<IdResponse>;
    /// Size and link statistics for a stored object.
    fn object_stat(&self, cid: &str) -> Result<ObjectStatResponse>;
    /// Attach free-form metadata to a CID.
    fn add_metadata(
        &self,
        cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<AddMetadataResponse>;
}

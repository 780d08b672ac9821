//! In-memory simulated client.
//!
//! Results are shaped exactly like the daemon client's but marked
//! `simulated: true`. Content added through this client round-trips; the
//! well-known `Qm`-prefixed test CIDs are always readable even when never
//! added, so fixtures like `QmTest123` work out of the box.

use crate::client::{
    AddMetadataResponse, AddResponse, CatResponse, ContentClient, IdResponse, ListPinsResponse,
    ObjectStatResponse, PinResponse,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use stowage_core::{Error, Result};

/// Peer id reported by the simulated node.
const SIMULATED_PEER_ID: &str = "12D3KooWSimulatedStowagePeer";

#[derive(Default)]
struct SimulatedState {
    content: BTreeMap<String, Vec<u8>>,
    pins: BTreeSet<String>,
    metadata: BTreeMap<String, BTreeMap<String, String>>,
}

/// A fully in-memory [`ContentClient`].
#[derive(Default)]
pub struct SimulatedClient {
    state: Mutex<SimulatedState>,
}

impl SimulatedClient {
    pub fn new() -> SimulatedClient {
        SimulatedClient::default()
    }

    /// Deterministic CID for simulated content: `Qm` + 44 hex chars of the
    /// content digest.
    fn cid_for(content: &[u8]) -> String {
        let digest = Sha256::digest(content);
        format!("Qm{}", &hex::encode(digest)[..44])
    }

    /// Test fixtures address content that was never added; any `Qm` CID is
    /// simulatable.
    fn is_simulatable(cid: &str) -> bool {
        cid.starts_with("Qm")
    }
}

impl ContentClient for SimulatedClient {
    fn add(&self, content: &[u8]) -> Result<AddResponse> {
        let cid = Self::cid_for(content);
        let mut state = self.state.lock();
        state.content.insert(cid.clone(), content.to_vec());
        Ok(AddResponse {
            success: true,
            cid,
            size: content.len() as u64,
            simulated: true,
        })
    }

    fn cat(&self, cid: &str) -> Result<CatResponse> {
        let state = self.state.lock();
        let data = match state.content.get(cid) {
            Some(data) => data.clone(),
            None if Self::is_simulatable(cid) => {
                format!("Simulated content for {cid}").into_bytes()
            }
            None => return Err(Error::NotFound(format!("content not found: {cid}"))),
        };
        Ok(CatResponse {
            success: true,
            data,
            simulated: true,
        })
    }

    fn pin(&self, cid: &str) -> Result<PinResponse> {
        let mut state = self.state.lock();
        if !state.content.contains_key(cid) && !Self::is_simulatable(cid) {
            return Err(Error::NotFound(format!("content not found: {cid}")));
        }
        state.pins.insert(cid.to_string());
        Ok(PinResponse {
            success: true,
            cid: cid.to_string(),
            pinned: true,
            simulated: true,
        })
    }

    fn unpin(&self, cid: &str) -> Result<PinResponse> {
        let mut state = self.state.lock();
        state.pins.remove(cid);
        Ok(PinResponse {
            success: true,
            cid: cid.to_string(),
            pinned: false,
            simulated: true,
        })
    }

    fn list_pins(&self) -> Result<ListPinsResponse> {
        let state = self.state.lock();
        Ok(ListPinsResponse {
            success: true,
            pins: state.pins.iter().cloned().collect(),
            simulated: true,
        })
    }

    fn id(&self) -> Result<IdResponse> {
        Ok(IdResponse {
            success: true,
            peer_id: SIMULATED_PEER_ID.to_string(),
            addresses: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
            simulated: true,
        })
    }

    fn object_stat(&self, cid: &str) -> Result<ObjectStatResponse> {
        let state = self.state.lock();
        let size = match state.content.get(cid) {
            Some(data) => data.len() as u64,
            None if Self::is_simulatable(cid) => 0,
            None => return Err(Error::NotFound(format!("content not found: {cid}"))),
        };
        Ok(ObjectStatResponse {
            success: true,
            cid: cid.to_string(),
            size,
            num_links: 0,
            simulated: true,
        })
    }

    fn add_metadata(
        &self,
        cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<AddMetadataResponse> {
        let mut state = self.state.lock();
        let entry = state.metadata.entry(cid.to_string()).or_default();
        for (k, v) in metadata {
            entry.insert(k.clone(), v.clone());
        }
        let keys = entry.keys().cloned().collect();
        Ok(AddMetadataResponse {
            success: true,
            cid: cid.to_string(),
            keys,
            simulated: true,
        })
    }
}

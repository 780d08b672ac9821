//! The narrow storage-market interface.
//!
//! A real chain client and the mock below implement the same four calls;
//! nothing else in the system may assume more about the market than this.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use stowage_core::{now_ms, Error, Result};

/// Roughly 180 days of 30-second epochs, the conventional deal length.
pub const DEFAULT_DEAL_DURATION_EPOCHS: u64 = 518_400;

/// A storage provider as advertised on the market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerInfo {
    /// Market address, e.g. `f01234`.
    pub address: String,
    pub region: String,
    /// 0..=100 reputation score.
    pub reputation: u32,
    /// Ask price in attoFIL per GiB per epoch.
    pub price_attofil_per_gib_epoch: u64,
    /// Whether the miner accepts verified deals.
    pub verified: bool,
}

/// Lifecycle of one storage deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealState {
    Proposed,
    Published,
    Active,
    Expired,
    Failed,
}

impl DealState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealState::Proposed => "proposed",
            DealState::Published => "published",
            DealState::Active => "active",
            DealState::Expired => "expired",
            DealState::Failed => "failed",
        }
    }

    /// Expired and failed deals never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DealState::Expired | DealState::Failed)
    }
}

impl std::fmt::Display for DealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage deal as reported by the market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_id: String,
    pub cid: String,
    pub miner: String,
    pub state: DealState,
    pub duration_epochs: u64,
    pub price_attofil_per_epoch: u64,
    pub verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Chain-level counters used for cost estimation and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub chain_height: u64,
    pub base_fee_attofil: u64,
    pub active_miners: usize,
}

/// The narrow market contract. Mock and real implementations are
/// interchangeable; selection happens at wiring time.
pub trait StorageMarketApi: Send + Sync {
    fn network_stats(&self) -> Result<NetworkStats>;
    /// Every miner currently advertising storage.
    fn list_miners(&self) -> Result<Vec<MinerInfo>>;
    /// Propose a deal for `cid` with one miner. Returns the deal in
    /// `Proposed` state; progress is observed through `deal_status`.
    fn propose_deal(
        &self,
        cid: &str,
        miner: &str,
        duration_epochs: u64,
        verified: bool,
    ) -> Result<DealInfo>;
    /// Current state of a deal.
    fn deal_status(&self, deal_id: &str) -> Result<DealInfo>;
}

/// Deterministic in-memory market.
///
/// Deals advance one state per `deal_status` poll
/// (proposed -> published -> active) so tests can step the lifecycle
/// without a clock. Miners marked unreachable reject proposals.
pub struct MockMarketApi {
    miners: Vec<MinerInfo>,
    unreachable: Mutex<Vec<String>>,
    deals: Mutex<BTreeMap<String, DealInfo>>,
    next_deal: AtomicU64,
    height: AtomicU64,
}

impl MockMarketApi {
    /// A market with a conventional spread of miners.
    pub fn new() -> MockMarketApi {
        MockMarketApi::with_miners(vec![
            MinerInfo {
                address: "f01001".into(),
                region: "eu-central".into(),
                reputation: 97,
                price_attofil_per_gib_epoch: 180,
                verified: true,
            },
            MinerInfo {
                address: "f01002".into(),
                region: "us-east".into(),
                reputation: 92,
                price_attofil_per_gib_epoch: 150,
                verified: true,
            },
            MinerInfo {
                address: "f01003".into(),
                region: "ap-south".into(),
                reputation: 88,
                price_attofil_per_gib_epoch: 120,
                verified: false,
            },
            MinerInfo {
                address: "f01004".into(),
                region: "us-west".into(),
                reputation: 72,
                price_attofil_per_gib_epoch: 90,
                verified: false,
            },
        ])
    }

    pub fn with_miners(miners: Vec<MinerInfo>) -> MockMarketApi {
        MockMarketApi {
            miners,
            unreachable: Mutex::new(Vec::new()),
            deals: Mutex::new(BTreeMap::new()),
            next_deal: AtomicU64::new(1),
            height: AtomicU64::new(1_000_000),
        }
    }

    /// Make a miner reject all future proposals.
    pub fn set_unreachable(&self, miner: &str) {
        self.unreachable.lock().push(miner.to_string());
    }
}

impl Default for MockMarketApi {
    fn default() -> MockMarketApi {
        MockMarketApi::new()
    }
}

impl StorageMarketApi for MockMarketApi {
    fn network_stats(&self) -> Result<NetworkStats> {
        Ok(NetworkStats {
            chain_height: self.height.fetch_add(1, Ordering::AcqRel),
            base_fee_attofil: 100,
            active_miners: self.miners.len(),
        })
    }

    fn list_miners(&self) -> Result<Vec<MinerInfo>> {
        Ok(self.miners.clone())
    }

    fn propose_deal(
        &self,
        cid: &str,
        miner: &str,
        duration_epochs: u64,
        verified: bool,
    ) -> Result<DealInfo> {
        if !self.miners.iter().any(|m| m.address == miner) {
            return Err(Error::NotFound(format!("unknown miner: {miner}")));
        }
        if self.unreachable.lock().iter().any(|m| m == miner) {
            return Err(Error::BackendUnavailable(format!(
                "miner {miner} not accepting deals"
            )));
        }
        let price = self
            .miners
            .iter()
            .find(|m| m.address == miner)
            .map(|m| m.price_attofil_per_gib_epoch)
            .unwrap_or(0);
        let id = self.next_deal.fetch_add(1, Ordering::AcqRel);
        let now = now_ms();
        let deal = DealInfo {
            deal_id: format!("deal-{id:06}"),
            cid: cid.to_string(),
            miner: miner.to_string(),
            state: DealState::Proposed,
            duration_epochs,
            price_attofil_per_epoch: price,
            verified,
            created_at: now,
            updated_at: now,
        };
        self.deals.lock().insert(deal.deal_id.clone(), deal.clone());
        Ok(deal)
    }

    fn deal_status(&self, deal_id: &str) -> Result<DealInfo> {
        let mut deals = self.deals.lock();
        let deal = deals
            .get_mut(deal_id)
            .ok_or_else(|| Error::NotFound(format!("unknown deal: {deal_id}")))?;
        // step the lifecycle once per observation
        deal.state = match deal.state {
            DealState::Proposed => DealState::Published,
            DealState::Published => DealState::Active,
            other => other,
        };
        deal.updated_at = now_ms();
        Ok(deal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deals_advance_one_state_per_poll() {
        let api = MockMarketApi::new();
        let deal = api
            .propose_deal("bafycid", "f01001", DEFAULT_DEAL_DURATION_EPOCHS, false)
            .unwrap();
        assert_eq!(deal.state, DealState::Proposed);
        assert_eq!(
            api.deal_status(&deal.deal_id).unwrap().state,
            DealState::Published
        );
        assert_eq!(
            api.deal_status(&deal.deal_id).unwrap().state,
            DealState::Active
        );
        // active is stable
        assert_eq!(
            api.deal_status(&deal.deal_id).unwrap().state,
            DealState::Active
        );
    }

    #[test]
    fn unknown_miner_and_deal_are_not_found() {
        let api = MockMarketApi::new();
        assert!(matches!(
            api.propose_deal("c", "f09999", 1, false).unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            api.deal_status("deal-999999").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn unreachable_miner_rejects_proposals() {
        let api = MockMarketApi::new();
        api.set_unreachable("f01002");
        let err = api.propose_deal("c", "f01002", 1, false).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn deal_ids_are_unique_and_ordered() {
        let api = MockMarketApi::new();
        let a = api.propose_deal("c1", "f01001", 1, false).unwrap();
        let b = api.propose_deal("c2", "f01001", 1, false).unwrap();
        assert_ne!(a.deal_id, b.deal_id);
        assert!(a.deal_id < b.deal_id);
    }
}

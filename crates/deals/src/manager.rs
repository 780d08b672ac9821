//! Miner selection and deal placement.

use crate::api::{DealInfo, DealState, MinerInfo, StorageMarketApi, DEFAULT_DEAL_DURATION_EPOCHS};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use stowage_core::{Error, Result};
use tracing::{debug, info, warn};

/// Criteria for selecting miners.
#[derive(Debug, Clone)]
pub struct MinerFilter {
    /// Minimum reputation score (0..=100).
    pub min_reputation: u32,
    /// Substring match against the miner's region, case-insensitive.
    pub region: Option<String>,
    /// Maximum ask price in attoFIL per GiB per epoch.
    pub max_price_attofil: Option<u64>,
}

impl Default for MinerFilter {
    fn default() -> MinerFilter {
        MinerFilter {
            min_reputation: 85,
            region: None,
            max_price_attofil: None,
        }
    }
}

/// How deals are placed for a piece of content.
#[derive(Debug, Clone)]
pub struct DealPolicy {
    pub duration_epochs: u64,
    pub verified: bool,
    /// Number of distinct miners to place the content with.
    pub redundancy: usize,
    pub filter: MinerFilter,
}

impl Default for DealPolicy {
    fn default() -> DealPolicy {
        DealPolicy {
            duration_epochs: DEFAULT_DEAL_DURATION_EPOCHS,
            verified: false,
            redundancy: 3,
            filter: MinerFilter::default(),
        }
    }
}

/// Outcome of a redundant placement.
#[derive(Debug, Clone, Serialize)]
pub struct RedundantStoreReport {
    pub cid: String,
    pub deals: Vec<DealInfo>,
    /// `(miner, error)` pairs for proposals that failed.
    pub failed: Vec<(String, String)>,
    pub requested: usize,
    /// Distinct miners that accepted a deal.
    pub redundancy_achieved: usize,
}

/// Estimated cost of storing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub size_bytes: u64,
    pub duration_epochs: u64,
    /// Cheapest eligible miner.
    pub miner: String,
    pub price_attofil_per_gib_epoch: u64,
    /// Total attoFIL over the full duration at that price.
    pub total_attofil: u128,
}

/// Redundancy summary for one CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentHealth {
    pub cid: String,
    pub total_deals: usize,
    pub active_deals: usize,
    /// True when at least one deal is active.
    pub healthy: bool,
}

/// Detailed view of one miner combined with local deal history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinerAnalysis {
    pub miner: MinerInfo,
    /// Deals this manager has placed with the miner.
    pub tracked_deals: usize,
    pub active_deals: usize,
    pub failed_deals: usize,
    /// attoFIL per GiB per epoch, straight from the ask.
    pub price_attofil_per_gib_epoch: u64,
}

/// Places and tracks storage deals through a [`StorageMarketApi`].
pub struct DealManager {
    api: Arc<dyn StorageMarketApi>,
    deals: Mutex<BTreeMap<String, DealInfo>>,
}

impl DealManager {
    pub fn new(api: Arc<dyn StorageMarketApi>) -> DealManager {
        DealManager {
            api,
            deals: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn StorageMarketApi> {
        &self.api
    }

    /// Miners passing the filter, cheapest first; reputation breaks ties.
    ///
    /// Selection is deterministic so the same market state always yields
    /// the same placement.
    pub fn recommended_miners(&self, filter: &MinerFilter) -> Result<Vec<MinerInfo>> {
        let mut miners: Vec<MinerInfo> = self
            .api
            .list_miners()?
            .into_iter()
            .filter(|m| m.reputation >= filter.min_reputation)
            .filter(|m| match &filter.region {
                Some(region) => m.region.to_lowercase().contains(&region.to_lowercase()),
                None => true,
            })
            .filter(|m| match filter.max_price_attofil {
                Some(max) => m.price_attofil_per_gib_epoch <= max,
                None => true,
            })
            .collect();
        miners.sort_by(|a, b| {
            a.price_attofil_per_gib_epoch
                .cmp(&b.price_attofil_per_gib_epoch)
                .then(b.reputation.cmp(&a.reputation))
                .then(a.address.cmp(&b.address))
        });
        Ok(miners)
    }

    /// Place `policy.redundancy` deals for a CID across distinct miners.
    ///
    /// Miners that reject a proposal are skipped and the next candidate is
    /// tried, so one bad miner does not sink the placement. Succeeds when
    /// at least one deal lands; callers read `redundancy_achieved` to see
    /// whether the full target was met.
    pub fn store_redundant(&self, cid: &str, policy: &DealPolicy) -> Result<RedundantStoreReport> {
        if policy.redundancy == 0 {
            return Err(Error::InvalidArgument("redundancy must be at least 1".into()));
        }
        let candidates = self.recommended_miners(&policy.filter)?;
        if candidates.is_empty() {
            return Err(Error::BackendUnavailable(
                "no miners pass the placement filter".into(),
            ));
        }

        let mut deals = Vec::new();
        let mut failed = Vec::new();
        for miner in &candidates {
            if deals.len() >= policy.redundancy {
                break;
            }
            match self.api.propose_deal(
                cid,
                &miner.address,
                policy.duration_epochs,
                policy.verified && miner.verified,
            ) {
                Ok(deal) => {
                    debug!(deal_id = %deal.deal_id, miner = %miner.address, "deal proposed");
                    self.deals.lock().insert(deal.deal_id.clone(), deal.clone());
                    deals.push(deal);
                }
                Err(e) => {
                    warn!(miner = %miner.address, error = %e, "deal proposal failed");
                    failed.push((miner.address.clone(), e.to_string()));
                }
            }
        }

        if deals.is_empty() {
            return Err(Error::BackendUnavailable(format!(
                "no miner accepted a deal for {cid}"
            )));
        }
        let achieved = deals.len();
        info!(cid, achieved, requested = policy.redundancy, "redundant placement done");
        Ok(RedundantStoreReport {
            cid: cid.to_string(),
            deals,
            failed,
            requested: policy.redundancy,
            redundancy_achieved: achieved,
        })
    }

    /// Re-poll every tracked, non-terminal deal; returns deals whose state
    /// changed.
    pub fn refresh(&self) -> Result<Vec<DealInfo>> {
        let tracked: Vec<DealInfo> = self.deals.lock().values().cloned().collect();
        let mut changed = Vec::new();
        for deal in tracked {
            if deal.state.is_terminal() {
                continue;
            }
            match self.api.deal_status(&deal.deal_id) {
                Ok(updated) => {
                    if updated.state != deal.state {
                        debug!(
                            deal_id = %updated.deal_id,
                            from = %deal.state,
                            to = %updated.state,
                            "deal state changed"
                        );
                        changed.push(updated.clone());
                    }
                    self.deals.lock().insert(updated.deal_id.clone(), updated);
                }
                Err(e) => warn!(deal_id = %deal.deal_id, error = %e, "deal refresh failed"),
            }
        }
        Ok(changed)
    }

    /// One tracked deal, if known.
    pub fn deal(&self, deal_id: &str) -> Option<DealInfo> {
        self.deals.lock().get(deal_id).cloned()
    }

    /// Every tracked deal for a CID.
    pub fn deals_for_cid(&self, cid: &str) -> Vec<DealInfo> {
        self.deals
            .lock()
            .values()
            .filter(|d| d.cid == cid)
            .cloned()
            .collect()
    }

    /// Redundancy summary for a CID from the tracked deal set.
    pub fn content_health(&self, cid: &str) -> ContentHealth {
        let deals = self.deals_for_cid(cid);
        let active = deals
            .iter()
            .filter(|d| d.state == DealState::Active)
            .count();
        ContentHealth {
            cid: cid.to_string(),
            total_deals: deals.len(),
            active_deals: active,
            healthy: active > 0,
        }
    }

    /// Combine a miner's market listing with this manager's deal history.
    pub fn analyze_miner(&self, address: &str) -> Result<MinerAnalysis> {
        let miner = self
            .api
            .list_miners()?
            .into_iter()
            .find(|m| m.address == address)
            .ok_or_else(|| Error::NotFound(format!("unknown miner: {address}")))?;
        let deals: Vec<DealInfo> = self
            .deals
            .lock()
            .values()
            .filter(|d| d.miner == address)
            .cloned()
            .collect();
        Ok(MinerAnalysis {
            price_attofil_per_gib_epoch: miner.price_attofil_per_gib_epoch,
            tracked_deals: deals.len(),
            active_deals: deals
                .iter()
                .filter(|d| d.state == DealState::Active)
                .count(),
            failed_deals: deals
                .iter()
                .filter(|d| d.state == DealState::Failed)
                .count(),
            miner,
        })
    }

    /// Cost of storing `size_bytes` for `duration_epochs` with the
    /// cheapest miner passing the filter.
    pub fn estimate_cost(
        &self,
        size_bytes: u64,
        duration_epochs: u64,
        filter: &MinerFilter,
    ) -> Result<CostEstimate> {
        let cheapest = self
            .recommended_miners(filter)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::BackendUnavailable("no miners pass the estimation filter".into())
            })?;
        // price is per GiB per epoch; charge for whole GiB like the market
        let gib = ((size_bytes + (1 << 30) - 1) >> 30).max(1);
        let total = gib as u128
            * cheapest.price_attofil_per_gib_epoch as u128
            * duration_epochs as u128;
        Ok(CostEstimate {
            size_bytes,
            duration_epochs,
            miner: cheapest.address.clone(),
            price_attofil_per_gib_epoch: cheapest.price_attofil_per_gib_epoch,
            total_attofil: total,
        })
    }
}

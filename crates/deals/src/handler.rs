//! WAL dispatch into the storage market.
//!
//! Registered for the market backend, this handler turns queued
//! `upload`/`add`/`pin` operations into redundant deals. Retrieval does
//! not go through the market in this substrate, so read-shaped operations
//! fail with `invalid_argument` rather than pretending.

use crate::manager::{DealManager, DealPolicy};
use std::sync::Arc;
use stowage_core::{ErrorKind, Operation, OperationType};
use stowage_wal::{BackendHandler, HandlerOutcome};

/// Backend handler that places WAL operations as storage deals.
pub struct MarketHandler {
    manager: Arc<DealManager>,
    policy: DealPolicy,
}

impl MarketHandler {
    pub fn new(manager: Arc<DealManager>, policy: DealPolicy) -> MarketHandler {
        MarketHandler { manager, policy }
    }
}

impl BackendHandler for MarketHandler {
    fn handle(&self, operation: &Operation) -> HandlerOutcome {
        let Some(cid) = operation.parameters.get("cid") else {
            return HandlerOutcome::failed(
                ErrorKind::InvalidArgument,
                "market operations require a cid parameter",
            );
        };
        match operation.operation_type {
            OperationType::Upload | OperationType::Add | OperationType::Pin => {
                match self.manager.store_redundant(cid, &self.policy) {
                    Ok(report) => {
                        let deal_ids: Vec<String> =
                            report.deals.iter().map(|d| d.deal_id.clone()).collect();
                        HandlerOutcome {
                            success: true,
                            cid: Some(cid.clone()),
                            size: None,
                            destination: Some(deal_ids.join(",")),
                            error: None,
                            error_type: None,
                        }
                    }
                    Err(e) => HandlerOutcome::failed(e.kind(), e.to_string()),
                }
            }
            other => HandlerOutcome::failed(
                ErrorKind::InvalidArgument,
                format!("operation {other} is not supported by the storage market"),
            ),
        }
    }
}

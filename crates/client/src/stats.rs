//! Per-operation statistics wrapper.

use crate::client::{
    AddMetadataResponse, AddResponse, CatResponse, ContentClient, IdResponse, ListPinsResponse,
    ObjectStatResponse, PinResponse,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use stowage_core::{now_ms, Result};

/// Counters and latency summary for one operation name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl OperationStats {
    pub fn mean_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.count as f64
        }
    }
}

/// Snapshot returned by [`NormalizedClient::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub operation_stats: BTreeMap<String, OperationStats>,
    /// Snapshot time, ms since epoch.
    pub timestamp: i64,
}

/// Wraps any [`ContentClient`] and tracks per-operation statistics.
pub struct NormalizedClient {
    inner: Arc<dyn ContentClient>,
    stats: Mutex<FxHashMap<&'static str, OperationStats>>,
}

impl NormalizedClient {
    pub fn new(inner: Arc<dyn ContentClient>) -> NormalizedClient {
        NormalizedClient {
            inner,
            stats: Mutex::new(FxHashMap::default()),
        }
    }

    fn record<T>(&self, operation: &'static str, run: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = run();
        let elapsed = started.elapsed().as_millis() as u64;
        let mut stats = self.stats.lock();
        let entry = stats.entry(operation).or_default();
        entry.count += 1;
        entry.total_latency_ms += elapsed;
        entry.max_latency_ms = entry.max_latency_ms.max(elapsed);
        match &result {
            Ok(_) => entry.successes += 1,
            Err(_) => entry.failures += 1,
        }
        result
    }

    /// Statistics for every operation invoked so far.
    pub fn get_stats(&self) -> ClientStats {
        let stats = self.stats.lock();
        ClientStats {
            operation_stats: stats
                .iter()
                .map(|(name, s)| (name.to_string(), *s))
                .collect(),
            timestamp: now_ms(),
        }
    }
}

impl ContentClient for NormalizedClient {
    fn add(&self, content: &[u8]) -> Result<AddResponse> {
        self.record("add", || self.inner.add(content))
    }

    fn cat(&self, cid: &str) -> Result<CatResponse> {
        self.record("cat", || self.inner.cat(cid))
    }

    fn pin(&self, cid: &str) -> Result<PinResponse> {
        self.record("pin", || self.inner.pin(cid))
    }

    fn unpin(&self, cid: &str) -> Result<PinResponse> {
        self.record("unpin", || self.inner.unpin(cid))
    }

    fn list_pins(&self) -> Result<ListPinsResponse> {
        self.record("list_pins", || self.inner.list_pins())
    }

    fn id(&self) -> Result<IdResponse> {
        self.record("id", || self.inner.id())
    }

    fn object_stat(&self, cid: &str) -> Result<ObjectStatResponse> {
        self.record("object_stat", || self.inner.object_stat(cid))
    }

    fn add_metadata(
        &self,
        cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<AddMetadataResponse> {
        self.record("add_metadata", || self.inner.add_metadata(cid, metadata))
    }
}

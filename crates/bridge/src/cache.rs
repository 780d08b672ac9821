//! Bounded LRU cache for dataset metadata.

use crate::sidecar::DatasetMetadata;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

struct CacheInner {
    entries: FxHashMap<String, DatasetMetadata>,
    /// Recency order, least-recent first.
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU over CID -> sidecar metadata.
pub struct MetadataCache {
    inner: Mutex<CacheInner>,
}

impl MetadataCache {
    pub fn new(capacity: usize) -> MetadataCache {
        MetadataCache {
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, cid: &str) -> Option<DatasetMetadata> {
        let mut inner = self.inner.lock();
        match inner.entries.get(cid).cloned() {
            Some(meta) => {
                inner.hits += 1;
                touch(&mut inner.order, cid);
                Some(meta)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, meta: DatasetMetadata) {
        let mut inner = self.inner.lock();
        let cid = meta.cid.clone();
        if inner.entries.insert(cid.clone(), meta).is_none() {
            inner.order.push_back(cid.clone());
        } else {
            touch(&mut inner.order, &cid);
        }
        while inner.entries.len() > inner.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    pub fn remove(&self, cid: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(cid);
        inner.order.retain(|c| c != cid);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }
}

fn touch(order: &mut VecDeque<String>, cid: &str) {
    if let Some(pos) = order.iter().position(|c| c == cid) {
        order.remove(pos);
    }
    order.push_back(cid.to_string());
}

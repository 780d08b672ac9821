//! Replication notification seam.
//!
//! The bridge does not replicate anything itself; it announces dataset
//! lifecycle events to a sink. Production wires a real replication manager
//! behind this trait, tests use [`RecordingSink`], and the default is a
//! no-op.

use crate::sidecar::DatasetMetadata;
use parking_lot::Mutex;

/// A dataset lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    Stored { cid: String },
    Deleted { cid: String },
}

/// Receives dataset lifecycle notifications.
pub trait ReplicationSink: Send + Sync {
    fn dataset_stored(&self, meta: &DatasetMetadata);
    fn dataset_deleted(&self, cid: &str);
}

/// Sink that ignores everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl ReplicationSink for NoopSink {
    fn dataset_stored(&self, _meta: &DatasetMetadata) {}
    fn dataset_deleted(&self, _cid: &str) {}
}

/// Sink that records events for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ReplicationEvent>>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn events(&self) -> Vec<ReplicationEvent> {
        self.events.lock().clone()
    }
}

impl ReplicationSink for RecordingSink {
    fn dataset_stored(&self, meta: &DatasetMetadata) {
        self.events.lock().push(ReplicationEvent::Stored {
            cid: meta.cid.clone(),
        });
    }

    fn dataset_deleted(&self, cid: &str) {
        self.events.lock().push(ReplicationEvent::Deleted {
            cid: cid.to_string(),
        });
    }
}

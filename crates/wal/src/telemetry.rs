//! Aggregated operation telemetry.
//!
//! Rolls the whole log (live partitions plus archives) into per-type and
//! per-backend buckets: status counts, retry totals, and completion
//! latency. Operators and dashboards read this instead of scanning rows.

use crate::store::WalStore;
use serde::Serialize;
use std::collections::BTreeMap;
use stowage_core::{now_ms, Operation, OperationStatus, Result};

/// Counters for one telemetry bucket (an operation type or a backend).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryBucket {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    /// Sum of `retry_count` over every operation in the bucket.
    pub total_retries: u64,
    /// Mean `completed_at - timestamp` over completed operations, ms.
    pub mean_completion_ms: f64,
    /// Count of failures per stable error kind.
    pub errors_by_kind: BTreeMap<String, usize>,
}

impl TelemetryBucket {
    fn record(&mut self, operation: &Operation) {
        self.total += 1;
        self.total_retries += operation.retry_count as u64;
        match operation.status {
            OperationStatus::Pending => self.pending += 1,
            OperationStatus::Processing => self.processing += 1,
            OperationStatus::Completed => {
                self.completed += 1;
                if let Some(completed_at) = operation.completed_at {
                    let latency = (completed_at - operation.timestamp).max(0) as f64;
                    // running mean over completed operations
                    let n = self.completed as f64;
                    self.mean_completion_ms += (latency - self.mean_completion_ms) / n;
                }
            }
            OperationStatus::Failed => {
                self.failed += 1;
                if let Some(kind) = &operation.error_type {
                    *self.errors_by_kind.entry(kind.clone()).or_default() += 1;
                }
            }
            OperationStatus::Retrying => self.retrying += 1,
        }
    }
}

/// A telemetry snapshot over the full log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalTelemetry {
    pub by_type: BTreeMap<String, TelemetryBucket>,
    pub by_backend: BTreeMap<String, TelemetryBucket>,
    /// Snapshot time, ms since epoch.
    pub collected_at: i64,
}

impl WalTelemetry {
    /// Overall operation count.
    pub fn total(&self) -> usize {
        self.by_type.values().map(|b| b.total).sum()
    }
}

/// Aggregate every live and archived operation into a snapshot.
pub fn collect(store: &WalStore) -> Result<WalTelemetry> {
    let mut telemetry = WalTelemetry {
        collected_at: now_ms(),
        ..Default::default()
    };
    for operation in store.get_all_operations()? {
        telemetry
            .by_type
            .entry(operation.operation_type.as_str().to_string())
            .or_default()
            .record(&operation);
        telemetry
            .by_backend
            .entry(operation.backend.as_str().to_string())
            .or_default()
            .record(&operation);
    }
    Ok(telemetry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StatusUpdate, WalOptions};
    use std::path::Path;
    use stowage_core::{Backend, CompressionCodec, OperationType, PartitionFormat};

    fn store(dir: &Path) -> WalStore {
        WalStore::open(WalOptions {
            base_path: dir.to_path_buf(),
            partition_size: 100,
            archive_completed: true,
            compression: CompressionCodec::None,
            row_group_size: 64,
            format: PartitionFormat::Parquet,
        })
        .unwrap()
    }

    #[test]
    fn buckets_split_by_type_and_backend() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        wal.append(Operation::new(OperationType::Add, Backend::Ipfs)).unwrap();
        wal.append(Operation::new(OperationType::Add, Backend::S3)).unwrap();
        wal.append(Operation::new(OperationType::Pin, Backend::Ipfs)).unwrap();

        let telemetry = collect(&wal).unwrap();
        assert_eq!(telemetry.total(), 3);
        assert_eq!(telemetry.by_type["add"].total, 2);
        assert_eq!(telemetry.by_type["pin"].total, 1);
        assert_eq!(telemetry.by_backend["ipfs"].total, 2);
        assert_eq!(telemetry.by_backend["s3"].pending, 1);
    }

    #[test]
    fn completion_latency_and_error_kinds_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());

        // one completed operation with a known 500ms latency
        let mut op = Operation::new(OperationType::Upload, Backend::Storacha);
        op.timestamp = 1_000;
        op.updated_at = 1_000;
        let op = wal.append(op).unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Processing,
            StatusUpdate::default(),
        )
        .unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Completed,
            StatusUpdate {
                completed_at: Some(1_500),
                ..Default::default()
            },
        )
        .unwrap();

        // one terminal failure with a stable kind
        let failed = wal
            .append(Operation::new(OperationType::Upload, Backend::Storacha))
            .unwrap();
        wal.update_operation_status(
            &failed.operation_id,
            OperationStatus::Processing,
            StatusUpdate::default(),
        )
        .unwrap();
        wal.update_operation_status(
            &failed.operation_id,
            OperationStatus::Failed,
            StatusUpdate {
                error: Some("gone".into()),
                error_type: Some("backend_unavailable".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let telemetry = collect(&wal).unwrap();
        let bucket = &telemetry.by_type["upload"];
        assert_eq!(bucket.completed, 1);
        assert_eq!(bucket.failed, 1);
        assert_eq!(bucket.mean_completion_ms, 500.0);
        assert_eq!(bucket.errors_by_kind["backend_unavailable"], 1);
    }

    #[test]
    fn retries_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let op = wal
            .append(Operation::new(OperationType::Get, Backend::Ipfs).with_max_retries(5))
            .unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Processing,
            StatusUpdate::default(),
        )
        .unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Retrying,
            StatusUpdate {
                retry_count: Some(3),
                ..Default::default()
            },
        )
        .unwrap();

        let telemetry = collect(&wal).unwrap();
        assert_eq!(telemetry.by_type["get"].total_retries, 3);
        assert_eq!(telemetry.by_type["get"].retrying, 1);
    }
}

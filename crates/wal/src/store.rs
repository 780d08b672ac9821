//! The durable, partitioned operation log.
//!
//! Layout under `base_path`:
//!
//! ```text
//! partitions/wal_<unix_ts>_<counter>.<ext>   # live rows
//! archives/archive_<YYYYMMDD>.<ext>          # terminal COMPLETED rows
//! ```
//!
//! A single rolling partition receives appends until it holds
//! `partition_size` rows, then a fresh one becomes current. All mutation
//! goes through one writer lock; every file replacement is
//! write-new-then-rename, so readers scanning committed files never need
//! the lock and per-id update histories are serialized.

use crate::partition::{
    list_archives, list_partitions, read_or_quarantine, write_atomic, PartitionId,
};
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use stowage_columnar::records::RecordCodec;
use stowage_core::{
    now_ms, time, Config, Error, Operation, OperationResult, OperationStatus, Result,
};
use tracing::{debug, info, warn};

/// Store construction options, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct WalOptions {
    pub base_path: PathBuf,
    pub partition_size: usize,
    pub archive_completed: bool,
    pub compression: stowage_core::CompressionCodec,
    pub row_group_size: usize,
    pub format: stowage_core::PartitionFormat,
}

impl WalOptions {
    pub fn from_config(config: &Config) -> WalOptions {
        WalOptions {
            base_path: config.base_path.clone(),
            partition_size: config.partition_size,
            archive_completed: config.archive_completed,
            compression: config.compression,
            row_group_size: config.row_group_size,
            format: config.partition_format,
        }
    }

    fn codec(&self) -> RecordCodec {
        match self.format {
            stowage_core::PartitionFormat::Parquet => RecordCodec::Parquet {
                compression: self.compression,
                row_group_size: self.row_group_size,
            },
            stowage_core::PartitionFormat::Json => RecordCodec::Json,
        }
    }
}

/// Field updates accompanying a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// Defaults to "now" when absent.
    pub updated_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub retry_count: Option<u32>,
    pub result: Option<OperationResult>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

/// Counters reported by [`WalStore::get_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WalStatistics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub partitions: usize,
    pub archives: usize,
    pub processing_active: bool,
}

/// Outcome of [`WalStore::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_count: usize,
    pub removed_files: Vec<String>,
}

struct StoreState {
    current: PartitionId,
    current_rows: usize,
    counter: u64,
}

/// Append-only, partitioned durable log of operations.
pub struct WalStore {
    options: WalOptions,
    codec: RecordCodec,
    partitions_dir: PathBuf,
    archives_dir: PathBuf,
    state: Mutex<StoreState>,
    /// Set by the processor while its worker thread runs.
    processing_active: AtomicBool,
    /// Signalled on every status mutation; `wait_for_operation` sleeps here.
    change_lock: Mutex<()>,
    change: Condvar,
}

impl WalStore {
    /// Open (or create) the store under `options.base_path`.
    ///
    /// Existing partitions are scanned to find the newest as the current
    /// write target; an undecodable current partition is quarantined and a
    /// fresh one is started.
    pub fn open(options: WalOptions) -> Result<WalStore> {
        let partitions_dir = options.base_path.join("partitions");
        let archives_dir = options.base_path.join("archives");
        std::fs::create_dir_all(&partitions_dir)?;
        if options.archive_completed {
            std::fs::create_dir_all(&archives_dir)?;
        }

        let codec = options.codec();
        let existing = list_partitions(&partitions_dir, codec.extension())?;
        let state = match existing.last() {
            Some((id, path)) => {
                let rows = read_or_quarantine(&codec, path).len();
                StoreState {
                    current: id.clone(),
                    current_rows: rows,
                    counter: id.counter,
                }
            }
            None => StoreState {
                current: PartitionId {
                    timestamp: unix_seconds(),
                    counter: 0,
                },
                current_rows: 0,
                counter: 0,
            },
        };

        info!(
            base = %options.base_path.display(),
            partitions = existing.len(),
            current = %state.current.file_name(codec.extension()),
            "opened WAL store"
        );

        let store = WalStore {
            options,
            codec,
            partitions_dir,
            archives_dir,
            state: Mutex::new(state),
            processing_active: AtomicBool::new(false),
            change_lock: Mutex::new(()),
            change: Condvar::new(),
        };
        store.reconcile_archives()?;
        Ok(store)
    }

    /// Restore archive/live disjointness after a crash.
    ///
    /// Archival writes the archive row before deleting the live row, so a
    /// crash in between leaves the id in both places. The archive copy is
    /// the later write and wins; the live duplicate is dropped here.
    fn reconcile_archives(&self) -> Result<()> {
        let mut archived_ids = std::collections::HashSet::new();
        for (_, path) in list_archives(&self.archives_dir, self.codec.extension())? {
            for op in read_or_quarantine(&self.codec, &path) {
                archived_ids.insert(op.operation_id);
            }
        }
        if archived_ids.is_empty() {
            return Ok(());
        }
        for (_, path) in list_partitions(&self.partitions_dir, self.codec.extension())? {
            let rows = read_or_quarantine(&self.codec, &path);
            let surviving: Vec<Operation> = rows
                .iter()
                .filter(|op| !archived_ids.contains(&op.operation_id))
                .cloned()
                .collect();
            if surviving.len() != rows.len() {
                warn!(
                    path = %path.display(),
                    dropped = rows.len() - surviving.len(),
                    "dropping live duplicates of archived operations"
                );
                write_atomic(&self.codec, &path, &surviving)?;
            }
        }
        Ok(())
    }

    fn partition_path(&self, id: &PartitionId) -> PathBuf {
        self.partitions_dir.join(id.file_name(self.codec.extension()))
    }

    fn archive_path(&self, bucket: &str) -> PathBuf {
        self.archives_dir
            .join(format!("archive_{bucket}.{}", self.codec.extension()))
    }

    /// Atomically persist a new operation and return it with any defaults
    /// filled in. Only `Pending` rows may enter the log.
    pub fn append(&self, mut operation: Operation) -> Result<Operation> {
        if operation.status != OperationStatus::Pending {
            return Err(Error::InvalidArgument(format!(
                "only pending operations may be appended, got {}",
                operation.status
            )));
        }
        if operation.operation_id.is_empty() {
            operation.operation_id = uuid::Uuid::new_v4().to_string();
        }
        if operation.timestamp == 0 {
            operation.timestamp = now_ms();
            operation.updated_at = operation.timestamp;
        }
        operation.validate()?;

        let mut state = self.state.lock();
        // A store reopened on an exactly-full partition must seal it now.
        if state.current_rows >= self.options.partition_size {
            state.counter += 1;
            state.current = PartitionId {
                timestamp: unix_seconds(),
                counter: state.counter,
            };
            state.current_rows = 0;
        }
        let path = self.partition_path(&state.current);
        let mut rows = if path.is_file() {
            read_or_quarantine(&self.codec, &path)
        } else {
            Vec::new()
        };
        rows.push(operation.clone());
        write_atomic(&self.codec, &path, &rows)?;
        state.current_rows = rows.len();
        debug!(
            operation_id = %operation.operation_id,
            partition = %state.current.file_name(self.codec.extension()),
            rows = state.current_rows,
            "appended operation"
        );

        // Rotation exactly at partition_size: the full partition is sealed
        // and a fresh id becomes the write target.
        if state.current_rows >= self.options.partition_size {
            state.counter += 1;
            state.current = PartitionId {
                timestamp: unix_seconds(),
                counter: state.counter,
            };
            state.current_rows = 0;
            debug!(
                next = %state.current.file_name(self.codec.extension()),
                "rotated WAL partition"
            );
        }
        Ok(operation)
    }

    /// Find an operation by id, scanning live partitions newest-first and
    /// then archives.
    pub fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>> {
        let partitions = list_partitions(&self.partitions_dir, self.codec.extension())?;
        for (_, path) in partitions.iter().rev() {
            if let Some(op) = self.find_in(path, operation_id) {
                return Ok(Some(op));
            }
        }
        for (_, path) in list_archives(&self.archives_dir, self.codec.extension())?.iter().rev() {
            if let Some(op) = self.find_in(path, operation_id) {
                return Ok(Some(op));
            }
        }
        Ok(None)
    }

    fn find_in(&self, path: &Path, operation_id: &str) -> Option<Operation> {
        self.codec
            .read(path)
            .ok()?
            .into_iter()
            .find(|op| op.operation_id == operation_id)
    }

    /// All operations with the given status, newest first, `limit` applied
    /// after sorting. Completed rows include the archives.
    pub fn get_operations_by_status(
        &self,
        status: OperationStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Operation>> {
        let mut matches = Vec::new();
        for (_, path) in list_partitions(&self.partitions_dir, self.codec.extension())? {
            matches.extend(
                read_or_quarantine(&self.codec, &path)
                    .into_iter()
                    .filter(|op| op.status == status),
            );
        }
        if status == OperationStatus::Completed {
            for (_, path) in list_archives(&self.archives_dir, self.codec.extension())? {
                matches.extend(
                    read_or_quarantine(&self.codec, &path)
                        .into_iter()
                        .filter(|op| op.status == status),
                );
            }
        }
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    /// Every live and archived operation, unsorted.
    pub fn get_all_operations(&self) -> Result<Vec<Operation>> {
        let mut all = Vec::new();
        for (_, path) in list_partitions(&self.partitions_dir, self.codec.extension())? {
            all.extend(read_or_quarantine(&self.codec, &path));
        }
        for (_, path) in list_archives(&self.archives_dir, self.codec.extension())? {
            all.extend(read_or_quarantine(&self.codec, &path));
        }
        Ok(all)
    }

    /// Validate and apply a status transition, rewriting the owning
    /// partition. A transition to `Completed` with archival enabled routes
    /// the row into the current date's archive file: the archive gains the
    /// row before the live partition loses it, so a crash in between leaves
    /// a duplicate (dropped from the live set on the next open) rather
    /// than a lost row.
    pub fn update_operation_status(
        &self,
        operation_id: &str,
        new_status: OperationStatus,
        updates: StatusUpdate,
    ) -> Result<Operation> {
        let state = self.state.lock();
        let partitions = list_partitions(&self.partitions_dir, self.codec.extension())?;
        for (_, path) in partitions.iter().rev() {
            let mut rows = match self.codec.read(path) {
                Ok(rows) => rows,
                Err(_) => continue, // quarantine happens on scan paths
            };
            let Some(index) = rows.iter().position(|op| op.operation_id == operation_id)
            else {
                continue;
            };

            let current = &rows[index];
            if !current.status.can_transition_to(new_status) {
                return Err(Error::InvalidArgument(format!(
                    "illegal status transition {} -> {} for operation {}",
                    current.status, new_status, operation_id
                )));
            }

            let mut updated = current.clone();
            updated.status = new_status;
            updated.updated_at = updates.updated_at.unwrap_or_else(now_ms);
            if let Some(completed_at) = updates.completed_at {
                updated.completed_at = Some(completed_at);
            }
            if let Some(next_retry_at) = updates.next_retry_at {
                updated.next_retry_at = Some(next_retry_at);
            }
            if let Some(retry_count) = updates.retry_count {
                updated.retry_count = retry_count;
            }
            if let Some(result) = updates.result {
                updated.result = Some(result);
            }
            if let Some(error) = updates.error {
                updated.error = Some(error);
            }
            if let Some(error_type) = updates.error_type {
                updated.error_type = Some(error_type);
            }
            if new_status == OperationStatus::Completed {
                updated.error = None;
                updated.error_type = None;
                if updated.completed_at.is_none() {
                    updated.completed_at = Some(updated.updated_at);
                }
            }
            updated.validate()?;

            if new_status == OperationStatus::Completed && self.options.archive_completed {
                self.archive_row(&updated)?;
                rows.remove(index);
                write_atomic(&self.codec, path, &rows)?;
            } else {
                rows[index] = updated.clone();
                write_atomic(&self.codec, path, &rows)?;
            }
            drop(state);

            debug!(
                operation_id,
                status = %new_status,
                "operation status updated"
            );
            let _guard = self.change_lock.lock();
            self.change.notify_all();
            return Ok(updated);
        }
        Err(Error::NotFound(format!(
            "operation not found in live partitions: {operation_id}"
        )))
    }

    fn archive_row(&self, operation: &Operation) -> Result<()> {
        std::fs::create_dir_all(&self.archives_dir)?;
        let path = self.archive_path(&time::today_bucket());
        let mut rows = if path.is_file() {
            read_or_quarantine(&self.codec, &path)
        } else {
            Vec::new()
        };
        // archive-before-delete can leave a duplicate after a crash
        rows.retain(|op| op.operation_id != operation.operation_id);
        rows.push(operation.clone());
        write_atomic(&self.codec, &path, &rows)
    }

    /// Delete archive files older than `max_age_days`.
    pub fn cleanup(&self, max_age_days: i64) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for (bucket, path) in list_archives(&self.archives_dir, self.codec.extension())? {
            match time::bucket_age_days(&bucket) {
                Some(age) if age > max_age_days => {
                    std::fs::remove_file(&path)?;
                    report.removed_count += 1;
                    report
                        .removed_files
                        .push(path.file_name().unwrap_or_default().to_string_lossy().into_owned());
                }
                Some(_) => {}
                None => warn!(bucket, "skipping archive with unparseable date bucket"),
            }
        }
        if report.removed_count > 0 {
            info!(
                removed = report.removed_count,
                "cleaned up expired WAL archives"
            );
        }
        Ok(report)
    }

    /// Status counts and file totals.
    pub fn get_statistics(&self) -> Result<WalStatistics> {
        let mut stats = WalStatistics {
            processing_active: self.processing_active.load(Ordering::Acquire),
            ..Default::default()
        };
        let partitions = list_partitions(&self.partitions_dir, self.codec.extension())?;
        stats.partitions = partitions.len();
        for (_, path) in &partitions {
            for op in read_or_quarantine(&self.codec, path) {
                stats.total += 1;
                match op.status {
                    OperationStatus::Pending => stats.pending += 1,
                    OperationStatus::Processing => stats.processing += 1,
                    OperationStatus::Completed => stats.completed += 1,
                    OperationStatus::Failed => stats.failed += 1,
                    OperationStatus::Retrying => stats.retrying += 1,
                }
            }
        }
        let archives = list_archives(&self.archives_dir, self.codec.extension())?;
        stats.archives = archives.len();
        for (_, path) in &archives {
            for op in read_or_quarantine(&self.codec, path) {
                stats.total += 1;
                if op.status == OperationStatus::Completed {
                    stats.completed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Block until the operation reaches a terminal status or `timeout`
    /// elapses. Wakes on every store mutation rather than busy-polling.
    pub fn wait_for_operation(
        &self,
        operation_id: &str,
        timeout: Duration,
    ) -> Result<Operation> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get_operation(operation_id)? {
                Some(op) if op.status.is_terminal() => return Ok(op),
                Some(_) => {}
                None => {
                    return Err(Error::NotFound(format!(
                        "operation not found: {operation_id}"
                    )))
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "operation {operation_id} not terminal after {timeout:?}"
                )));
            }
            let mut guard = self.change_lock.lock();
            self.change.wait_for(&mut guard, deadline - now);
        }
    }

    pub(crate) fn set_processing_active(&self, active: bool) {
        self.processing_active.store(active, Ordering::Release);
    }

    /// Flush and release resources. The store holds no open handles between
    /// calls, so this only marks the processor flag and logs; it is safe to
    /// call any number of times.
    pub fn close(&self) {
        self.set_processing_active(false);
        debug!("WAL store closed");
    }
}

fn unix_seconds() -> u64 {
    (now_ms() / 1000).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::{Backend, CompressionCodec, OperationType, PartitionFormat};

    fn options(dir: &Path) -> WalOptions {
        WalOptions {
            base_path: dir.to_path_buf(),
            partition_size: 3,
            archive_completed: true,
            compression: CompressionCodec::None,
            row_group_size: 64,
            format: PartitionFormat::Parquet,
        }
    }

    fn store(dir: &Path) -> WalStore {
        WalStore::open(options(dir)).unwrap()
    }

    fn pending_op() -> Operation {
        Operation::new(OperationType::Add, Backend::Ipfs).with_max_retries(3)
    }

    #[test]
    fn append_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let op = wal.append(pending_op()).unwrap();
        let found = wal.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(found, op);
        assert!(wal.get_operation("nope").unwrap().is_none());
    }

    #[test]
    fn rotation_exactly_at_partition_size() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        for _ in 0..3 {
            wal.append(pending_op()).unwrap();
        }
        // partition sealed at 3 rows; the 4th lands in a new file
        wal.append(pending_op()).unwrap();
        let stats = wal.get_statistics().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.partitions, 2);
    }

    #[test]
    fn non_pending_append_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let mut op = pending_op();
        op.status = OperationStatus::Processing;
        assert!(wal.append(op).is_err());
    }

    #[test]
    fn update_validates_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let op = wal.append(pending_op()).unwrap();

        // pending -> completed skips processing: rejected
        let err = wal
            .update_operation_status(
                &op.operation_id,
                OperationStatus::Completed,
                StatusUpdate::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Processing,
            StatusUpdate::default(),
        )
        .unwrap();
        let updated = wal
            .update_operation_status(
                &op.operation_id,
                OperationStatus::Completed,
                StatusUpdate {
                    result: Some(OperationResult {
                        cid: Some("bafyfinal".into()),
                        size: Some(1),
                        destination: None,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.completed_at.is_some());
        assert!(updated.error.is_none());
    }

    #[test]
    fn completed_rows_move_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let op = wal.append(pending_op()).unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Processing,
            StatusUpdate::default(),
        )
        .unwrap();
        wal.update_operation_status(
            &op.operation_id,
            OperationStatus::Completed,
            StatusUpdate::default(),
        )
        .unwrap();

        // archived rows never appear in a live partition again
        let stats = wal.get_statistics().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.archives, 1);
        let live: Vec<Operation> = list_partitions(
            &dir.path().join("partitions"),
            "parquet",
        )
        .unwrap()
        .iter()
        .flat_map(|(_, p)| RecordCodec::Parquet {
            compression: CompressionCodec::None,
            row_group_size: 64,
        }
        .read(p)
        .unwrap())
        .collect();
        assert!(live.iter().all(|o| o.operation_id != op.operation_id));

        // still findable through the archive scan
        let found = wal.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(found.status, OperationStatus::Completed);
    }

    #[test]
    fn by_status_sorts_newest_first_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut op = pending_op();
            op.timestamp = 1000 + i;
            op.updated_at = op.timestamp;
            ids.push(wal.append(op).unwrap().operation_id);
        }
        let pending = wal
            .get_operations_by_status(OperationStatus::Pending, None)
            .unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending[0].timestamp >= pending[1].timestamp);
        let limited = wal
            .get_operations_by_status(OperationStatus::Pending, Some(2))
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn reopen_resumes_current_partition() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = store(dir.path());
            wal.append(pending_op()).unwrap();
            wal.append(pending_op()).unwrap();
        }
        let wal = store(dir.path());
        wal.append(pending_op()).unwrap();
        let stats = wal.get_statistics().unwrap();
        // partition_size is 3: all three fit the resumed partition
        assert_eq!(stats.partitions, 1);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn cleanup_removes_only_expired_archives() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        // synthesize an old archive and a current one
        let archives = dir.path().join("archives");
        std::fs::create_dir_all(&archives).unwrap();
        let codec = RecordCodec::Parquet {
            compression: CompressionCodec::None,
            row_group_size: 64,
        };
        let mut done = pending_op();
        done.status = OperationStatus::Pending;
        codec
            .write(archives.join("archive_20200101.parquet"), &[done.clone()])
            .unwrap();
        codec
            .write(
                archives.join(format!("archive_{}.parquet", time::today_bucket())),
                &[done],
            )
            .unwrap();

        let report = wal.cleanup(30).unwrap();
        assert_eq!(report.removed_count, 1);
        assert_eq!(report.removed_files, vec!["archive_20200101.parquet"]);
        assert!(archives
            .join(format!("archive_{}.parquet", time::today_bucket()))
            .exists());
    }

    #[test]
    fn wait_for_operation_times_out_on_nonterminal() {
        let dir = tempfile::tempdir().unwrap();
        let wal = store(dir.path());
        let op = wal.append(pending_op()).unwrap();
        let err = wal
            .wait_for_operation(&op.operation_id, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}

//! Partition file naming, discovery, and atomic replacement.
//!
//! Live partitions are named `wal_<unix_ts>_<counter>.<ext>` so a plain
//! name sort yields creation order. Archives are date-bucketed
//! `archive_<YYYYMMDD>.<ext>`. Every rewrite goes through a temp file and
//! an atomic rename; a file that fails to decode is quarantined with a
//! `.corrupt` suffix rather than silently dropped.

use std::fs::File;
use std::path::{Path, PathBuf};
use stowage_core::{Operation, Result};
use stowage_columnar::records::RecordCodec;
use tracing::warn;

/// Identifier of one live partition file (without extension).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionId {
    pub timestamp: u64,
    pub counter: u64,
}

impl PartitionId {
    pub fn file_name(&self, extension: &str) -> String {
        format!("wal_{}_{}.{}", self.timestamp, self.counter, extension)
    }

    /// Parse `wal_<ts>_<counter>` from a file stem.
    pub fn parse(stem: &str) -> Option<PartitionId> {
        let rest = stem.strip_prefix("wal_")?;
        let (ts, counter) = rest.split_once('_')?;
        Some(PartitionId {
            timestamp: ts.parse().ok()?,
            counter: counter.parse().ok()?,
        })
    }
}

/// List live partition files in creation order (oldest first).
pub fn list_partitions(dir: &Path, extension: &str) -> Result<Vec<(PartitionId, PathBuf)>> {
    let mut partitions = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(id) = PartitionId::parse(stem) {
            partitions.push((id, path));
        }
    }
    partitions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(partitions)
}

/// List archive files as `(bucket, path)` pairs, oldest first.
pub fn list_archives(dir: &Path, extension: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut archives = Vec::new();
    if !dir.is_dir() {
        return Ok(archives);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(bucket) = stem.strip_prefix("archive_") {
            archives.push((bucket.to_string(), path));
        }
    }
    archives.sort();
    Ok(archives)
}

/// Atomically replace `path` with the given operations.
///
/// The new content is written to a sibling temp file, fsynced, and renamed
/// over the target. An empty operation set removes the file instead, so
/// fully-drained partitions disappear rather than lingering as husks.
pub fn write_atomic(codec: &RecordCodec, path: &Path, operations: &[Operation]) -> Result<()> {
    if operations.is_empty() {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }
    let tmp = path.with_extension("tmp");
    codec.write(&tmp, operations)?;
    File::open(&tmp)?.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a partition, quarantining it on decode failure.
///
/// A quarantined file is renamed `<name>.corrupt` and reported as empty;
/// startup and scans keep going instead of wedging on one bad file.
pub fn read_or_quarantine(codec: &RecordCodec, path: &Path) -> Vec<Operation> {
    match codec.read(path) {
        Ok(operations) => operations,
        Err(e) => {
            let quarantine = path.with_extension(format!(
                "{}.corrupt",
                path.extension().and_then(|s| s.to_str()).unwrap_or("dat")
            ));
            warn!(
                path = %path.display(),
                error = %e,
                quarantine = %quarantine.display(),
                "quarantining undecodable partition file"
            );
            if let Err(rename_err) = std::fs::rename(path, &quarantine) {
                warn!(error = %rename_err, "failed to quarantine partition file");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::{Backend, CompressionCodec, OperationType};

    fn codec() -> RecordCodec {
        RecordCodec::Parquet {
            compression: CompressionCodec::None,
            row_group_size: 64,
        }
    }

    #[test]
    fn partition_id_parse_and_order() {
        let a = PartitionId::parse("wal_100_0").unwrap();
        let b = PartitionId::parse("wal_100_1").unwrap();
        let c = PartitionId::parse("wal_200_0").unwrap();
        assert!(a < b && b < c);
        assert!(PartitionId::parse("checkpoint_1").is_none());
        assert!(PartitionId::parse("wal_x_1").is_none());
    }

    #[test]
    fn list_partitions_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["wal_200_0.parquet", "wal_100_0.parquet", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = list_partitions(dir.path(), "parquet").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, PartitionId { timestamp: 100, counter: 0 });
    }

    #[test]
    fn write_atomic_empty_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal_1_0.parquet");
        let op = Operation::new(OperationType::Add, Backend::Ipfs);
        write_atomic(&codec(), &path, &[op]).unwrap();
        assert!(path.is_file());
        write_atomic(&codec(), &path, &[]).unwrap();
        assert!(!path.exists());
        // removing an already-absent file is fine
        write_atomic(&codec(), &path, &[]).unwrap();
    }

    #[test]
    fn corrupt_partition_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal_1_0.parquet");
        std::fs::write(&path, b"this is not parquet").unwrap();
        let ops = read_or_quarantine(&codec(), &path);
        assert!(ops.is_empty());
        assert!(!path.exists());
        assert!(path.with_extension("parquet.corrupt").exists());
    }
}

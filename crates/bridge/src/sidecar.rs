//! Dataset sidecar metadata.
//!
//! Every stored dataset has a sidecar file `<metadata_dir>/<cid>.json`
//! that is the durable source of truth: the in-process CID index is
//! rebuilt from sidecars on open, and a dataset without a sidecar does not
//! exist as far as the bridge is concerned. Sidecars contain no wall-clock
//! fields, so storing the same table twice produces byte-identical files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stowage_columnar::Schema;
use stowage_core::{Error, Result};
use tracing::warn;

/// Physical layout of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    /// One Parquet file.
    Single,
    /// Hive-style directory keyed by partition column values.
    Hive,
    /// Directory of size-bounded chunk files.
    Chunked,
}

/// The sidecar record for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub cid: String,
    pub name: Option<String>,
    pub schema: Schema,
    pub schema_fingerprint: String,
    pub content_hash: String,
    pub row_count: usize,
    pub column_count: usize,
    pub size_bytes: u64,
    pub layout: DatasetLayout,
    /// Partition columns for `Hive` layout, in partition order.
    #[serde(default)]
    pub partition_cols: Vec<String>,
    pub compression: String,
    /// Artifact path (file for `Single`, directory otherwise).
    pub path: PathBuf,
    /// Caller-supplied attributes.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DatasetMetadata {
    pub fn partitioned(&self) -> bool {
        self.layout == DatasetLayout::Hive
    }
}

/// Sidecar path for a CID.
pub fn sidecar_path(metadata_dir: &Path, cid: &str) -> PathBuf {
    metadata_dir.join(format!("{cid}.json"))
}

/// Write the sidecar atomically (temp + rename).
pub fn save(metadata_dir: &Path, meta: &DatasetMetadata) -> Result<()> {
    std::fs::create_dir_all(metadata_dir)?;
    let path = sidecar_path(metadata_dir, &meta.cid);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(meta)?;
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Load one sidecar by CID.
pub fn load(metadata_dir: &Path, cid: &str) -> Result<DatasetMetadata> {
    let path = sidecar_path(metadata_dir, cid);
    let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("dataset not found: {cid}")),
        _ => Error::Io(e),
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Remove a sidecar; absent is fine.
pub fn remove(metadata_dir: &Path, cid: &str) -> Result<()> {
    match std::fs::remove_file(sidecar_path(metadata_dir, cid)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Scan every sidecar in the directory, skipping undecodable files.
pub fn scan(metadata_dir: &Path) -> Result<Vec<DatasetMetadata>> {
    let mut out = Vec::new();
    if !metadata_dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(metadata_dir)? {
        let path = entry?.path();
        if path.extension().map_or(true, |e| e != "json") {
            continue;
        }
        match std::fs::read(&path)
            .map_err(Error::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
        {
            Ok(meta) => out.push(meta),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping undecodable sidecar"),
        }
    }
    Ok(out)
}

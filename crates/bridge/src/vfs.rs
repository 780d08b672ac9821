//! Read-only virtual filesystem over the bridge.
//!
//! Three top-level directories:
//!
//! - `/datasets/<cid>`: the stored artifact as a byte sequence.
//!   Directory-backed artifacts (hive or chunked) are materialized on the
//!   fly as a single-file Parquet serialization.
//! - `/metadata/<cid>.json`: the sidecar, byte-exact.
//! - `/queries/<hash>.json`: cached query results.
//!
//! Every operation is read-only; any write-shaped request fails with
//! `invalid_argument`. Listings are idempotent snapshots computed from the
//! bridge's current index.

use crate::bridge::ColumnarBridge;
use crate::sidecar::DatasetLayout;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use stowage_columnar::{write_table_to_vec, ReadOptions, Table, WriteOptions};
use stowage_core::{Error, Result};
use tracing::debug;

/// Entry kind in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// One listing or info entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub kind: FileKind,
    /// Stored size for datasets; exact byte length for metadata and query
    /// results; 0 for directories.
    pub size: u64,
}

/// The filesystem facade.
pub struct VirtualFileSystem {
    bridge: Arc<ColumnarBridge>,
    query_cache: DashMap<String, Vec<u8>>,
}

impl VirtualFileSystem {
    pub fn new(bridge: Arc<ColumnarBridge>) -> VirtualFileSystem {
        VirtualFileSystem {
            bridge,
            query_cache: DashMap::new(),
        }
    }

    fn normalize(path: &str) -> String {
        let trimmed = path.trim();
        let mut normalized = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        normalized
    }

    /// List a directory (or a single file as itself).
    pub fn ls(&self, path: &str) -> Result<Vec<FileInfo>> {
        let path = Self::normalize(path);
        match path.as_str() {
            "/" => Ok(vec![
                dir_info("/datasets"),
                dir_info("/metadata"),
                dir_info("/queries"),
            ]),
            "/datasets" => {
                let mut entries = Vec::new();
                for summary in self.bridge.list_datasets()? {
                    entries.push(FileInfo {
                        path: format!("/datasets/{}", summary.cid),
                        kind: FileKind::File,
                        size: summary.size_bytes,
                    });
                }
                Ok(entries)
            }
            "/metadata" => {
                let mut entries = Vec::new();
                for summary in self.bridge.list_datasets()? {
                    let size = self.bridge.sidecar_bytes(&summary.cid)?.len() as u64;
                    entries.push(FileInfo {
                        path: format!("/metadata/{}.json", summary.cid),
                        kind: FileKind::File,
                        size,
                    });
                }
                Ok(entries)
            }
            "/queries" => {
                let mut entries: Vec<FileInfo> = self
                    .query_cache
                    .iter()
                    .map(|entry| FileInfo {
                        path: format!("/queries/{}.json", entry.key()),
                        kind: FileKind::File,
                        size: entry.value().len() as u64,
                    })
                    .collect();
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(entries)
            }
            _ => self.info(&path).map(|info| vec![info]),
        }
    }

    /// Metadata for one path.
    pub fn info(&self, path: &str) -> Result<FileInfo> {
        let path = Self::normalize(path);
        if matches!(path.as_str(), "/" | "/datasets" | "/metadata" | "/queries") {
            return Ok(dir_info(&path));
        }
        if let Some(cid) = path.strip_prefix("/datasets/") {
            let (meta, _) = self.bridge.resolve_metadata(cid, true)?;
            return Ok(FileInfo {
                path,
                kind: FileKind::File,
                size: meta.size_bytes,
            });
        }
        if let Some(name) = path.strip_prefix("/metadata/") {
            let cid = name.strip_suffix(".json").ok_or_else(|| {
                Error::NotFound(format!("no such metadata entry: {path}"))
            })?;
            let size = self.bridge.sidecar_bytes(cid)?.len() as u64;
            return Ok(FileInfo {
                path,
                kind: FileKind::File,
                size,
            });
        }
        if let Some(name) = path.strip_prefix("/queries/") {
            let hash = name.strip_suffix(".json").unwrap_or(name);
            if let Some(entry) = self.query_cache.get(hash) {
                return Ok(FileInfo {
                    path,
                    kind: FileKind::File,
                    size: entry.len() as u64,
                });
            }
            return Err(Error::NotFound(format!("no such query result: {path}")));
        }
        Err(Error::NotFound(format!("no such path: {path}")))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.info(path).is_ok()
    }

    /// Open a path for reading. Any mode other than `r`/`rb` fails with
    /// `invalid_argument`.
    pub fn open(&self, path: &str, mode: &str) -> Result<VfsFile> {
        if !matches!(mode, "r" | "rb") {
            return Err(Error::InvalidArgument(format!(
                "write access not supported by the dataset filesystem (mode {mode:?})"
            )));
        }
        let data = self.read_bytes(path)?;
        Ok(VfsFile {
            data: Arc::new(data),
            pos: 0,
            closed: false,
        })
    }

    /// Read a byte range of a path; `start`/`end` are clamped to the
    /// content length.
    pub fn cat_file(&self, path: &str, start: Option<u64>, end: Option<u64>) -> Result<Vec<u8>> {
        let data = self.read_bytes(path)?;
        let len = data.len() as u64;
        let start = start.unwrap_or(0).min(len) as usize;
        let end = end.unwrap_or(len).min(len) as usize;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(data[start..end].to_vec())
    }

    /// Evaluate a read-only query and cache its JSON result under
    /// `/queries/<hash>.json`; returns that path.
    pub fn query_to_path(
        &self,
        sql: &str,
        cid_aliases: &BTreeMap<String, String>,
    ) -> Result<String> {
        let table = self.bridge.query(sql, cid_aliases)?;
        let bytes = serde_json::to_vec_pretty(&table_to_json(&table))?;
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        for (alias, cid) in cid_aliases {
            hasher.update(alias.as_bytes());
            hasher.update(b"=");
            hasher.update(cid.as_bytes());
            hasher.update(b";");
        }
        let hash = hex::encode(hasher.finalize())[..16].to_string();
        self.query_cache.insert(hash.clone(), bytes);
        debug!(hash, "cached query result");
        Ok(format!("/queries/{hash}.json"))
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize(path);
        if let Some(cid) = path.strip_prefix("/datasets/") {
            return self.read_dataset_bytes(cid);
        }
        if let Some(name) = path.strip_prefix("/metadata/") {
            let cid = name.strip_suffix(".json").ok_or_else(|| {
                Error::NotFound(format!("no such metadata entry: {path}"))
            })?;
            return self.bridge.sidecar_bytes(cid);
        }
        if let Some(name) = path.strip_prefix("/queries/") {
            let hash = name.strip_suffix(".json").unwrap_or(name);
            return self
                .query_cache
                .get(hash)
                .map(|entry| entry.clone())
                .ok_or_else(|| Error::NotFound(format!("no such query result: {path}")));
        }
        Err(Error::NotFound(format!("not a readable path: {path}")))
    }

    /// Artifact bytes: direct for single files, materialized into one
    /// Parquet serialization for directory-backed layouts.
    fn read_dataset_bytes(&self, cid: &str) -> Result<Vec<u8>> {
        let (meta, _) = self.bridge.resolve_metadata(cid, true)?;
        match meta.layout {
            DatasetLayout::Single => Ok(std::fs::read(&meta.path)?),
            DatasetLayout::Hive | DatasetLayout::Chunked => {
                let table = self.bridge.read_artifact(&meta, &ReadOptions::default())?;
                write_table_to_vec(
                    &table,
                    &WriteOptions {
                        compression: stowage_core::CompressionCodec::None,
                        ..WriteOptions::default()
                    },
                )
            }
        }
    }
}

fn dir_info(path: &str) -> FileInfo {
    FileInfo {
        path: path.to_string(),
        kind: FileKind::Directory,
        size: 0,
    }
}

fn table_to_json(table: &Table) -> serde_json::Value {
    use stowage_columnar::table::Cell;
    let mut rows = Vec::with_capacity(table.row_count());
    for row in 0..table.row_count() {
        let mut obj = serde_json::Map::new();
        for column in table.columns() {
            let value = match column.data.cell(row) {
                Cell::Null => serde_json::Value::Null,
                Cell::Utf8(s) => serde_json::Value::String(s),
                Cell::Int64(v) => serde_json::Value::from(v),
                Cell::Float64(v) => serde_json::Value::from(v),
                Cell::Bool(v) => serde_json::Value::from(v),
            };
            obj.insert(column.name.clone(), value);
        }
        rows.push(serde_json::Value::Object(obj));
    }
    serde_json::Value::Array(rows)
}

/// An open read-only handle.
#[derive(Debug)]
pub struct VfsFile {
    data: Arc<Vec<u8>>,
    pos: usize,
    closed: bool,
}

impl VfsFile {
    /// Read up to `size` bytes (-1 style "rest of file" via `None`).
    pub fn read(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::InvalidArgument("file handle is closed".into()));
        }
        let remaining = self.data.len().saturating_sub(self.pos);
        let take = size.unwrap_or(remaining).min(remaining);
        let out = self.data[self.pos..self.pos + take].to_vec();
        self.pos += take;
        Ok(out)
    }

    /// Absolute seek; clamped to the content length.
    pub fn seek(&mut self, position: u64) -> u64 {
        self.pos = (position as usize).min(self.data.len());
        self.pos as u64
    }

    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Close the handle; further reads fail. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

//! Store, retrieve, query, list, delete.

use crate::cache::MetadataCache;
use crate::cid::{content_hash, derive_cid};
use crate::query;
use crate::replication::ReplicationSink;
use crate::sidecar::{self, DatasetLayout, DatasetMetadata};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use stowage_columnar::{
    read_table, read_table_partitioned, write_table, write_table_chunked,
    write_table_partitioned, Filter, ReadOptions, Table, WriteOptions,
};
use stowage_core::{
    Backend, CompressionCodec, Config, ContentReference, Error, Operation, OperationResult,
    OperationStatus, OperationType, Result,
};
use stowage_wal::{StatusUpdate, WalStore};
use tracing::{debug, info, warn};

/// Bridge construction options, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub base_path: PathBuf,
    pub compression: CompressionCodec,
    pub row_group_size: usize,
    /// Artifacts estimated above this size are split into chunk files.
    pub max_partition_size: u64,
    pub cache_capacity: usize,
    pub enable_wal: bool,
    pub enable_replication: bool,
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> BridgeOptions {
        BridgeOptions {
            base_path: config.parquet_base.clone(),
            compression: config.compression,
            row_group_size: config.row_group_size,
            max_partition_size: config.max_partition_size,
            cache_capacity: config.cache_capacity,
            enable_wal: config.enable_wal,
            enable_replication: config.enable_replication,
        }
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    pub cid: String,
    pub size_bytes: u64,
    pub row_count: usize,
    pub column_count: usize,
    pub partitioned: bool,
    pub path: PathBuf,
    /// True when an identical dataset already existed and no bytes moved.
    pub deduplicated: bool,
}

/// Outcome of a retrieve.
#[derive(Debug)]
pub struct RetrieveResult {
    pub table: Table,
    pub metadata: DatasetMetadata,
    /// True when the metadata came from the cache (data is always read
    /// from the artifact).
    pub metadata_from_cache: bool,
}

/// One row of `list_datasets`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub cid: String,
    pub path: PathBuf,
    pub partitioned: bool,
    pub size_bytes: u64,
    pub row_count: usize,
    pub metadata: BTreeMap<String, String>,
}

/// Aggregate storage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub dataset_count: usize,
    pub total_size_bytes: u64,
    pub partitioned_count: usize,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Content-addressed store for tabular datasets.
///
/// CID ↔ path live in two in-process maps updated under one write lock;
/// the sidecar files under `metadata/` are the durable source of truth and
/// rebuild the maps on open.
pub struct ColumnarBridge {
    options: BridgeOptions,
    partitions_dir: PathBuf,
    metadata_dir: PathBuf,
    cid_to_path: DashMap<String, PathBuf>,
    path_to_cid: DashMap<PathBuf, String>,
    /// Access-tracking view of each artifact across backends.
    references: DashMap<String, ContentReference>,
    write_lock: Mutex<()>,
    cache: MetadataCache,
    wal: Option<Arc<WalStore>>,
    replication: Option<Arc<dyn ReplicationSink>>,
}

impl ColumnarBridge {
    /// Open the bridge, rebuilding the CID index from sidecars.
    pub fn open(
        options: BridgeOptions,
        wal: Option<Arc<WalStore>>,
        replication: Option<Arc<dyn ReplicationSink>>,
    ) -> Result<ColumnarBridge> {
        let partitions_dir = options.base_path.join("partitions");
        let metadata_dir = options.base_path.join("metadata");
        std::fs::create_dir_all(&partitions_dir)?;
        std::fs::create_dir_all(&metadata_dir)?;

        let cid_to_path = DashMap::new();
        let path_to_cid = DashMap::new();
        let references = DashMap::new();
        let known = sidecar::scan(&metadata_dir)?;
        for meta in &known {
            cid_to_path.insert(meta.cid.clone(), meta.path.clone());
            path_to_cid.insert(meta.path.clone(), meta.cid.clone());
            references.insert(meta.cid.clone(), reference_for(meta));
        }
        info!(
            base = %options.base_path.display(),
            datasets = known.len(),
            "opened columnar bridge"
        );

        let cache = MetadataCache::new(options.cache_capacity);
        Ok(ColumnarBridge {
            options,
            partitions_dir,
            metadata_dir,
            cid_to_path,
            path_to_cid,
            references,
            write_lock: Mutex::new(()),
            cache,
            wal,
            replication,
        })
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            compression: self.options.compression,
            row_group_size: self.options.row_group_size,
            dictionary: true,
        }
    }

    /// Persist a table as a content-addressed artifact.
    ///
    /// Deterministic: the same canonical table with the same name and
    /// metadata always produces the same CID, and re-storing it is a
    /// dedup no-op.
    pub fn store(
        &self,
        table: &Table,
        name: Option<&str>,
        metadata: Option<BTreeMap<String, String>>,
        partition_cols: Option<&[String]>,
    ) -> Result<StoreReceipt> {
        if table.column_count() == 0 {
            return Err(Error::InvalidArgument(
                "cannot store a table with no columns".into(),
            ));
        }
        let user_metadata = metadata.unwrap_or_default();
        let schema = table.schema();
        let fingerprint = schema.fingerprint();
        let hash = content_hash(table);
        let cid = derive_cid(
            &hash,
            &fingerprint,
            name,
            table.row_count(),
            self.options.compression.as_str(),
            &user_metadata,
        );

        let _guard = self.write_lock.lock();
        if let Some(existing) = self.cid_to_path.get(&cid) {
            let meta = sidecar::load(&self.metadata_dir, &cid)?;
            debug!(cid, "store deduplicated against existing artifact");
            return Ok(StoreReceipt {
                cid,
                size_bytes: meta.size_bytes,
                row_count: meta.row_count,
                column_count: meta.column_count,
                partitioned: meta.partitioned(),
                path: existing.clone(),
                deduplicated: true,
            });
        }

        let write_options = self.write_options();
        let (layout, path, size_bytes, partition_cols) = match partition_cols {
            Some(cols) if !cols.is_empty() => {
                let dir = self.partitions_dir.join(&cid);
                let size = write_table_partitioned(&dir, table, cols, &write_options)?;
                (DatasetLayout::Hive, dir, size, cols.to_vec())
            }
            _ if table.estimated_bytes() > self.options.max_partition_size => {
                let dir = self.partitions_dir.join(&cid);
                let size = write_table_chunked(
                    &dir,
                    table,
                    self.options.max_partition_size,
                    &write_options,
                )?;
                (DatasetLayout::Chunked, dir, size, Vec::new())
            }
            _ => {
                let file = self.partitions_dir.join(format!("{cid}.parquet"));
                let size = write_table(&file, table, &write_options)?;
                (DatasetLayout::Single, file, size, Vec::new())
            }
        };

        let meta = DatasetMetadata {
            cid: cid.clone(),
            name: name.map(str::to_string),
            schema,
            schema_fingerprint: fingerprint,
            content_hash: hash,
            row_count: table.row_count(),
            column_count: table.column_count(),
            size_bytes,
            layout,
            partition_cols,
            compression: self.options.compression.as_str().to_string(),
            path: path.clone(),
            metadata: user_metadata,
        };
        sidecar::save(&self.metadata_dir, &meta)?;
        self.cid_to_path.insert(cid.clone(), path.clone());
        self.path_to_cid.insert(path.clone(), cid.clone());
        self.references.insert(cid.clone(), reference_for(&meta));
        drop(_guard);

        self.cache.put(meta.clone());
        if self.options.enable_wal {
            self.journal_store(&meta);
        }
        if self.options.enable_replication {
            if let Some(sink) = &self.replication {
                sink.dataset_stored(&meta);
            }
        }
        info!(cid, rows = meta.row_count, size = size_bytes, "stored dataset");

        Ok(StoreReceipt {
            cid,
            size_bytes,
            row_count: meta.row_count,
            column_count: meta.column_count,
            partitioned: meta.partitioned(),
            path,
            deduplicated: false,
        })
    }

    /// Record a completed store in the WAL for audit and recovery tooling.
    fn journal_store(&self, meta: &DatasetMetadata) {
        let Some(wal) = &self.wal else { return };
        let op = Operation::new(OperationType::Add, Backend::Local)
            .with_parameter("cid", meta.cid.clone())
            .with_parameter("path", meta.path.to_string_lossy());
        let journaled = wal.append(op).and_then(|op| {
            wal.update_operation_status(
                &op.operation_id,
                OperationStatus::Processing,
                StatusUpdate::default(),
            )?;
            wal.update_operation_status(
                &op.operation_id,
                OperationStatus::Completed,
                StatusUpdate {
                    result: Some(OperationResult {
                        cid: Some(meta.cid.clone()),
                        size: Some(meta.size_bytes as i64),
                        destination: Some(meta.path.to_string_lossy().into_owned()),
                    }),
                    ..Default::default()
                },
            )
        });
        if let Err(e) = journaled {
            // journaling is advisory; the artifact itself is already durable
            warn!(cid = %meta.cid, error = %e, "failed to journal dataset store");
        }
    }

    /// Raw sidecar bytes for a CID, exactly as stored on disk.
    pub fn sidecar_bytes(&self, cid: &str) -> Result<Vec<u8>> {
        std::fs::read(sidecar::sidecar_path(&self.metadata_dir, cid)).map_err(|e| {
            match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("dataset not found: {cid}"))
                }
                _ => Error::Io(e),
            }
        })
    }

    /// Resolve sidecar metadata for a CID, optionally via the cache.
    pub(crate) fn resolve_metadata(
        &self,
        cid: &str,
        use_cache: bool,
    ) -> Result<(DatasetMetadata, bool)> {
        if use_cache {
            if let Some(meta) = self.cache.get(cid) {
                return Ok((meta, true));
            }
        }
        let meta = sidecar::load(&self.metadata_dir, cid)?;
        self.cache.put(meta.clone());
        Ok((meta, false))
    }

    /// Read a dataset back, with projection and filter pushdown.
    pub fn retrieve(
        &self,
        cid: &str,
        columns: Option<Vec<String>>,
        filters: Vec<Filter>,
        use_cache: bool,
    ) -> Result<RetrieveResult> {
        let (metadata, metadata_from_cache) = self.resolve_metadata(cid, use_cache)?;
        let mut options = ReadOptions::default().with_filters(filters);
        if let Some(columns) = columns {
            options = options.with_columns(columns);
        }
        let table = self.read_artifact(&metadata, &options)?;
        if let Some(mut reference) = self.references.get_mut(cid) {
            reference.touch();
        }
        Ok(RetrieveResult {
            table,
            metadata,
            metadata_from_cache,
        })
    }

    pub(crate) fn read_artifact(
        &self,
        metadata: &DatasetMetadata,
        options: &ReadOptions,
    ) -> Result<Table> {
        match metadata.layout {
            DatasetLayout::Single => read_table(&metadata.path, options),
            DatasetLayout::Hive => read_table_partitioned(
                &metadata.path,
                &metadata.partition_cols,
                &metadata.schema,
                options,
            ),
            DatasetLayout::Chunked => stowage_columnar::read::read_table_dir(&metadata.path, options),
        }
    }

    /// Evaluate a read-only query against previously stored datasets.
    ///
    /// `cid_aliases` maps table names appearing in the query to CIDs.
    /// Projection is pushed into the artifact read; writes are rejected.
    pub fn query(
        &self,
        sql: &str,
        cid_aliases: &BTreeMap<String, String>,
    ) -> Result<Table> {
        let plan = query::parse(sql)?;
        let cid = cid_aliases.get(&plan.table).ok_or_else(|| {
            Error::InvalidArgument(format!("no CID bound for table alias {}", plan.table))
        })?;
        let (metadata, _) = self.resolve_metadata(cid, true)?;
        plan.execute(|options| self.read_artifact(&metadata, options))
    }

    /// Every known dataset, from the in-process index.
    pub fn list_datasets(&self) -> Result<Vec<DatasetSummary>> {
        let mut out = Vec::new();
        for meta in sidecar::scan(&self.metadata_dir)? {
            out.push(DatasetSummary {
                cid: meta.cid.clone(),
                path: meta.path.clone(),
                partitioned: meta.partitioned(),
                size_bytes: meta.size_bytes,
                row_count: meta.row_count,
                metadata: meta.metadata.clone(),
            });
        }
        out.sort_by(|a, b| a.cid.cmp(&b.cid));
        Ok(out)
    }

    /// Access-tracking reference for a stored artifact: where it lives,
    /// its integrity digest, and how often it has been read.
    pub fn content_reference(&self, cid: &str) -> Option<ContentReference> {
        self.references.get(cid).map(|r| r.clone())
    }

    /// All CIDs currently known, sorted.
    pub fn known_cids(&self) -> Vec<String> {
        let mut cids: Vec<String> = self.cid_to_path.iter().map(|e| e.key().clone()).collect();
        cids.sort();
        cids
    }

    /// Remove a dataset: artifact files, sidecar, cache entry, and index
    /// entries. Copies already handed to external consumers are untouched.
    pub fn delete(&self, cid: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let Some((_, path)) = self.cid_to_path.remove(cid) else {
            return Err(Error::NotFound(format!("dataset not found: {cid}")));
        };
        self.path_to_cid.remove(&path);
        self.references.remove(cid);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        sidecar::remove(&self.metadata_dir, cid)?;
        self.cache.remove(cid);
        drop(_guard);

        if self.options.enable_replication {
            if let Some(sink) = &self.replication {
                sink.dataset_deleted(cid);
            }
        }
        info!(cid, "deleted dataset");
        Ok(())
    }

    /// Aggregate counters over every known dataset.
    pub fn get_storage_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        for meta in sidecar::scan(&self.metadata_dir)? {
            stats.dataset_count += 1;
            stats.total_size_bytes += meta.size_bytes;
            if meta.partitioned() {
                stats.partitioned_count += 1;
            }
        }
        stats.cache_entries = self.cache.len();
        let (hits, misses) = self.cache.stats();
        stats.cache_hits = hits;
        stats.cache_misses = misses;
        Ok(stats)
    }

    /// Drop cached metadata; subsequent reads consult sidecars again.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Release in-process state. The bridge holds no open file handles, so
    /// this clears the cache and index; safe to call repeatedly.
    pub fn close(&self) {
        self.cache.clear();
        debug!("columnar bridge closed");
    }
}

/// Build the cross-backend reference for an artifact from its sidecar.
fn reference_for(meta: &DatasetMetadata) -> ContentReference {
    let mut reference = ContentReference::new(meta.cid.clone());
    reference.content_hash = Some(meta.content_hash.clone());
    reference
        .backend_locations
        .insert(Backend::Local, meta.path.to_string_lossy().into_owned());
    reference.metadata = meta.metadata.clone();
    reference
}

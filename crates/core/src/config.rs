//! Configuration for all Stowage components.
//!
//! A single [`Config`] carries every tunable: WAL layout and retry policy,
//! health-monitor cadence, columnar-bridge codec settings, and daemon
//! supervision paths. Durations are stored as plain seconds so a JSON config
//! file reads the way the options are documented.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compression codec applied to columnar artifacts and WAL partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionCodec {
    None,
    Snappy,
    Gzip,
    Zstd,
}

impl CompressionCodec {
    /// Stable wire name, as recorded in dataset sidecars.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionCodec::None => "none",
            CompressionCodec::Snappy => "snappy",
            CompressionCodec::Gzip => "gzip",
            CompressionCodec::Zstd => "zstd",
        }
    }
}

/// On-disk encoding of WAL partitions and archives.
///
/// `Parquet` is the default; `Json` is the line-delimited fallback used
/// where a columnar engine is unwanted (tiny deployments, debugging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFormat {
    Parquet,
    Json,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of WAL storage (`partitions/` and `archives/` live beneath it).
    pub base_path: PathBuf,
    /// Root of columnar-bridge storage (`partitions/` and `metadata/`).
    pub parquet_base: PathBuf,
    /// Local content-addressed daemon repository (holds `repo.lock`).
    pub repo_path: PathBuf,

    /// Max rows per live WAL partition before rotation.
    pub partition_size: usize,
    /// Default per-operation retry cap.
    pub max_retries: u32,
    /// Seconds between retries (linear backoff baseline).
    pub retry_delay_secs: u64,
    /// Whether to move COMPLETED rows to archive files.
    pub archive_completed: bool,
    /// Processor tick period, seconds.
    pub process_interval_secs: u64,
    /// Health-monitor probe period, seconds.
    pub check_interval_secs: u64,
    /// Number of recent probe results retained per backend.
    pub history_size: usize,
    /// Columnar codec.
    pub compression: CompressionCodec,
    /// Max columnar artifact size in bytes before splitting into chunks.
    pub max_partition_size: u64,
    /// Notify the replication sink on dataset stores.
    pub enable_replication: bool,
    /// Log bridge stores through the WAL.
    pub enable_wal: bool,

    /// WAL partition encoding.
    pub partition_format: PartitionFormat,
    /// Rows per Parquet row group.
    pub row_group_size: usize,
    /// Bridge metadata cache capacity (entries).
    pub cache_capacity: usize,
    /// Per-dispatch deadline, seconds.
    pub operation_timeout_secs: u64,
    /// Per-probe deadline, seconds.
    pub probe_timeout_secs: u64,
    /// Overall daemon_start deadline, seconds.
    pub daemon_start_timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL on daemon_stop, seconds.
    pub daemon_stop_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            base_path: PathBuf::from("stowage/wal"),
            parquet_base: PathBuf::from("stowage/datasets"),
            repo_path: PathBuf::from("stowage/repo"),
            partition_size: 1000,
            max_retries: 5,
            retry_delay_secs: 60,
            archive_completed: true,
            process_interval_secs: 5,
            check_interval_secs: 60,
            history_size: 25,
            compression: CompressionCodec::Zstd,
            max_partition_size: 256 * 1024 * 1024,
            enable_replication: false,
            enable_wal: false,
            partition_format: PartitionFormat::Parquet,
            row_group_size: 1024,
            cache_capacity: 256,
            operation_timeout_secs: 30,
            probe_timeout_secs: 10,
            daemon_start_timeout_secs: 30,
            daemon_stop_grace_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Config = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Rooted configuration: places WAL, datasets, and repo under `root`.
    pub fn rooted(root: impl AsRef<Path>) -> Config {
        let root = root.as_ref();
        Config {
            base_path: root.join("wal"),
            parquet_base: root.join("datasets"),
            repo_path: root.join("repo"),
            ..Config::default()
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.partition_size == 0 {
            return Err(Error::InvalidArgument("partition_size must be > 0".into()));
        }
        if self.row_group_size == 0 {
            return Err(Error::InvalidArgument("row_group_size must be > 0".into()));
        }
        if self.history_size == 0 {
            return Err(Error::InvalidArgument("history_size must be > 0".into()));
        }
        if self.max_partition_size == 0 {
            return Err(Error::InvalidArgument(
                "max_partition_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn daemon_start_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_start_timeout_secs)
    }

    pub fn daemon_stop_grace(&self) -> Duration {
        Duration::from_secs(self.daemon_stop_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_size, 1000);
        assert_eq!(config.max_retries, 5);
        assert!(config.archive_completed);
    }

    #[test]
    fn load_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"partition_size": 10, "compression": "gzip"}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.partition_size, 10);
        assert_eq!(config.compression, CompressionCodec::Gzip);
        // untouched field keeps its default
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn zero_partition_size_rejected() {
        let config = Config {
            partition_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rooted_places_trees_under_root() {
        let config = Config::rooted("/data/stowage");
        assert_eq!(config.base_path, PathBuf::from("/data/stowage/wal"));
        assert_eq!(config.parquet_base, PathBuf::from("/data/stowage/datasets"));
        assert_eq!(config.repo_path, PathBuf::from("/data/stowage/repo"));
    }
}

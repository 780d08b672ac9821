//! Daemon-backed client.
//!
//! Delegates each normalized operation to the local daemon's CLI through
//! the secure subprocess layer. The daemon has no metadata surface, so
//! `add_metadata` is the one transparently simulated operation here: it is
//! kept in memory and marked `simulated: true`, shaped identically to the
//! rest of the contract.

use crate::client::{
    AddMetadataResponse, AddResponse, CatResponse, ContentClient, IdResponse, ListPinsResponse,
    ObjectStatResponse, PinResponse,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use stowage_core::{Error, Result};
use stowage_daemon::{CommandPolicy, SecureCommand};
use tracing::debug;

/// Client that shells out to the daemon CLI (argv-only, policy-checked).
pub struct DaemonClient {
    binary: String,
    repo_path: PathBuf,
    policy: CommandPolicy,
    timeout: Duration,
    metadata: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl DaemonClient {
    pub fn new(repo_path: impl Into<PathBuf>) -> DaemonClient {
        DaemonClient {
            binary: "ipfs".to_string(),
            repo_path: repo_path.into(),
            policy: CommandPolicy::default(),
            timeout: Duration::from_secs(30),
            metadata: Mutex::new(BTreeMap::new()),
        }
    }

    /// Override the daemon binary and policy (the binary must be allowed).
    pub fn with_binary(mut self, binary: impl Into<String>, policy: CommandPolicy) -> DaemonClient {
        self.binary = binary.into();
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> DaemonClient {
        self.timeout = timeout;
        self
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let mut argv = vec![self.binary.clone()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let output = SecureCommand::new(&self.policy, argv)
            .env("IPFS_PATH", self.repo_path.to_string_lossy())
            .run(self.timeout)?;
        if output.timed_out {
            return Err(Error::Timeout(format!(
                "daemon command {:?} exceeded {:?}",
                args, self.timeout
            )));
        }
        if !output.success() {
            return Err(Error::Execution(format!(
                "daemon command {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout_utf8())
    }
}

impl ContentClient for DaemonClient {
    fn add(&self, content: &[u8]) -> Result<AddResponse> {
        // the CLI adds files, not byte streams
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(content)?;
        scratch.flush()?;
        let path = scratch.path().to_string_lossy().into_owned();
        let stdout = self.run(&["add", "-q", &path])?;
        let cid = stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Execution("daemon add produced no CID".into()))?
            .to_string();
        debug!(cid, size = content.len(), "added content via daemon");
        Ok(AddResponse {
            success: true,
            cid,
            size: content.len() as u64,
            simulated: false,
        })
    }

    fn cat(&self, cid: &str) -> Result<CatResponse> {
        let stdout = self.run(&["cat", cid])?;
        Ok(CatResponse {
            success: true,
            data: stdout.into_bytes(),
            simulated: false,
        })
    }

    fn pin(&self, cid: &str) -> Result<PinResponse> {
        self.run(&["pin", "add", cid])?;
        Ok(PinResponse {
            success: true,
            cid: cid.to_string(),
            pinned: true,
            simulated: false,
        })
    }

    fn unpin(&self, cid: &str) -> Result<PinResponse> {
        self.run(&["pin", "rm", cid])?;
        Ok(PinResponse {
            success: true,
            cid: cid.to_string(),
            pinned: false,
            simulated: false,
        })
    }

    fn list_pins(&self) -> Result<ListPinsResponse> {
        let stdout = self.run(&["pin", "ls", "--type=recursive", "--quiet"])?;
        let pins = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(ListPinsResponse {
            success: true,
            pins,
            simulated: false,
        })
    }

    fn id(&self) -> Result<IdResponse> {
        let stdout = self.run(&["id"])?;
        let value: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| Error::Serialization(format!("daemon id output: {e}")))?;
        let peer_id = value
            .get("ID")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let addresses = value
            .get("Addresses")
            .and_then(|v| v.as_array())
            .map(|addrs| {
                addrs
                    .iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(IdResponse {
            success: true,
            peer_id,
            addresses,
            simulated: false,
        })
    }

    fn object_stat(&self, cid: &str) -> Result<ObjectStatResponse> {
        let stdout = self.run(&["object", "stat", cid])?;
        // plain "Key: value" lines
        let mut size = 0;
        let mut num_links = 0;
        for line in stdout.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "CumulativeSize" => size = value.trim().parse().unwrap_or(0),
                "NumLinks" => num_links = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
        Ok(ObjectStatResponse {
            success: true,
            cid: cid.to_string(),
            size,
            num_links,
            simulated: false,
        })
    }

    fn add_metadata(
        &self,
        cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<AddMetadataResponse> {
        // no daemon surface for this; simulate with the real contract shape
        let mut store = self.metadata.lock();
        let entry = store.entry(cid.to_string()).or_default();
        for (k, v) in metadata {
            entry.insert(k.clone(), v.clone());
        }
        Ok(AddMetadataResponse {
            success: true,
            cid: cid.to_string(),
            keys: entry.keys().cloned().collect(),
            simulated: true,
        })
    }
}

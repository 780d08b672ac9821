//! Operation model shared by the WAL, processor, and backends.
//!
//! An [`Operation`] is a single request against one backend. Operations are
//! created in `Pending` state, appended to the WAL, and mutated only through
//! the status machine encoded in [`OperationStatus::can_transition_to`]:
//!
//! ```text
//! PENDING ──▶ PROCESSING ──▶ COMPLETED
//!                  │
//!                  ├──▶ RETRYING ──▶ PROCESSING   (retry_count < max_retries)
//!                  └──▶ FAILED                    (terminal)
//! ```
//!
//! `Completed` and `Failed` are terminal. Cancellation forces `Failed` from
//! any non-terminal state.

use crate::error::{Error, Result};
use crate::time::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kinds of operations recorded in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Add,
    Get,
    Pin,
    Unpin,
    Rm,
    Cat,
    List,
    Mkdir,
    Copy,
    Move,
    Upload,
    Download,
    Custom,
}

impl OperationType {
    /// Stable wire name, as stored in partition files.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Add => "add",
            OperationType::Get => "get",
            OperationType::Pin => "pin",
            OperationType::Unpin => "unpin",
            OperationType::Rm => "rm",
            OperationType::Cat => "cat",
            OperationType::List => "list",
            OperationType::Mkdir => "mkdir",
            OperationType::Copy => "copy",
            OperationType::Move => "move",
            OperationType::Upload => "upload",
            OperationType::Download => "download",
            OperationType::Custom => "custom",
        }
    }

    /// Parse a wire name; unknown names map to `Custom`.
    pub fn parse(s: &str) -> OperationType {
        match s {
            "add" => OperationType::Add,
            "get" => OperationType::Get,
            "pin" => OperationType::Pin,
            "unpin" => OperationType::Unpin,
            "rm" => OperationType::Rm,
            "cat" => OperationType::Cat,
            "list" => OperationType::List,
            "mkdir" => OperationType::Mkdir,
            "copy" => OperationType::Copy,
            "move" => OperationType::Move,
            "upload" => OperationType::Upload,
            "download" => OperationType::Download,
            _ => OperationType::Custom,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Ipfs,
    S3,
    Storacha,
    Filecoin,
    Local,
    Custom,
}

impl Backend {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ipfs => "ipfs",
            Backend::S3 => "s3",
            Backend::Storacha => "storacha",
            Backend::Filecoin => "filecoin",
            Backend::Local => "local",
            Backend::Custom => "custom",
        }
    }

    /// Parse a wire name; unknown names map to `Custom`.
    pub fn parse(s: &str) -> Backend {
        match s {
            "ipfs" => Backend::Ipfs,
            "s3" => Backend::S3,
            "storacha" => Backend::Storacha,
            "filecoin" => Backend::Filecoin,
            "local" => Backend::Local,
            _ => Backend::Custom,
        }
    }

    /// All backend kinds, in wire order.
    pub fn all() -> [Backend; 6] {
        [
            Backend::Ipfs,
            Backend::S3,
            Backend::Storacha,
            Backend::Filecoin,
            Backend::Local,
            Backend::Custom,
        ]
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl OperationStatus {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Retrying => "retrying",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Result<OperationStatus> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "retrying" => Ok(OperationStatus::Retrying),
            other => Err(Error::InvalidArgument(format!(
                "unknown operation status: {other}"
            ))),
        }
    }

    /// True for states that admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }

    /// Whether the status machine admits `self -> next`.
    ///
    /// `Pending -> Failed` and `Retrying -> Failed` cover operator
    /// cancellation; every other edge is driven by the processor.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Pending, Failed) => true,
            (Processing, Completed) => true,
            (Processing, Retrying) => true,
            (Processing, Failed) => true,
            (Retrying, Processing) => true,
            (Retrying, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of a successful backend dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Content identifier produced by the backend, if any.
    pub cid: Option<String>,
    /// Size in bytes, if reported.
    pub size: Option<i64>,
    /// Backend-specific locator (e.g. an `s3://` URL).
    pub destination: Option<String>,
}

impl OperationResult {
    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.cid.is_none() && self.size.is_none() && self.destination.is_none()
    }
}

/// A single request against one backend, as persisted in the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Globally unique opaque identifier; immutable once assigned.
    pub operation_id: String,
    pub operation_type: OperationType,
    pub backend: Backend,
    pub status: OperationStatus,
    /// Enqueue time, ms since epoch.
    pub timestamp: i64,
    /// Last mutation time, ms since epoch.
    pub updated_at: i64,
    /// Set only on terminal success.
    pub completed_at: Option<i64>,
    /// Earliest time the processor may re-dispatch a retrying operation.
    pub next_retry_at: Option<i64>,
    /// Stringly-typed request parameters (`path`, `cid`, `recursive`, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub result: Option<OperationResult>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Operation {
    /// Create a new pending operation with a fresh id and current timestamps.
    pub fn new(operation_type: OperationType, backend: Backend) -> Operation {
        let now = now_ms();
        Operation {
            operation_id: Uuid::new_v4().to_string(),
            operation_type,
            backend,
            status: OperationStatus::Pending,
            timestamp: now,
            updated_at: now,
            completed_at: None,
            next_retry_at: None,
            parameters: BTreeMap::new(),
            result: None,
            error: None,
            error_type: None,
            retry_count: 0,
            max_retries: 0,
        }
    }

    /// Builder-style parameter attachment.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Operation {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder-style retry cap.
    pub fn with_max_retries(mut self, max_retries: u32) -> Operation {
        self.max_retries = max_retries;
        self
    }

    /// Validate internal invariants (`retry_count <= max_retries`,
    /// `completed_at` only on success).
    pub fn validate(&self) -> Result<()> {
        if self.retry_count > self.max_retries {
            return Err(Error::InvalidArgument(format!(
                "operation {}: retry_count {} exceeds max_retries {}",
                self.operation_id, self.retry_count, self.max_retries
            )));
        }
        if self.completed_at.is_some() && self.status != OperationStatus::Completed {
            return Err(Error::InvalidArgument(format!(
                "operation {}: completed_at set in non-completed status {}",
                self.operation_id, self.status
            )));
        }
        Ok(())
    }
}

/// A content-addressed item stored in one or more backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentReference {
    /// Globally unique content identifier.
    pub content_id: String,
    /// Optional integrity digest over the raw bytes.
    pub content_hash: Option<String>,
    /// Backend kind -> backend-specific locator.
    #[serde(default)]
    pub backend_locations: BTreeMap<Backend, String>,
    /// Free-form attributes.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
}

impl ContentReference {
    /// Create a reference for `content_id` created now.
    pub fn new(content_id: impl Into<String>) -> ContentReference {
        let now = now_ms();
        ContentReference {
            content_id: content_id.into(),
            created_at: now,
            last_accessed: now,
            ..Default::default()
        }
    }

    /// Record an access now.
    pub fn touch(&mut self) {
        self.last_accessed = now_ms();
        self.access_count += 1;
    }
}

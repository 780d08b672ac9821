//! Error types for the Stowage substrate.
//!
//! Every public operation either returns typed data or an [`Error`] whose
//! [`ErrorKind`] is stable across releases. The kind strings are part of the
//! wire contract: they appear verbatim in operation rows (`error_type`) and
//! in structured results surfaced to callers.

use std::io;
use thiserror::Error;

/// Result type alias for Stowage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classification.
///
/// These kinds are recorded in WAL rows and structured results as
/// snake_case strings; they must never be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An operation or probe exceeded its deadline.
    Timeout,
    /// The referenced entity (operation, CID, path) does not exist.
    NotFound,
    /// Malformed input, illegal status transition, or unsupported request.
    InvalidArgument,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// A daemon lock file exists but its owning process is gone.
    StaleLockFile,
    /// The daemon did not come up within its start deadline.
    DaemonStartTimeout,
    /// The target backend is not currently online.
    BackendUnavailable,
    /// Stored data does not match the expected schema.
    SchemaMismatch,
    /// Corruption or digest mismatch detected in stored data.
    IntegrityError,
    /// The operation was cancelled by an operator.
    Cancelled,
    /// A subprocess request was rejected by the security policy.
    SecurityError,
    /// Generic execution failure (I/O, handler crash, backend error).
    ExecutionError,
}

impl ErrorKind {
    /// The stable snake_case wire name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::StaleLockFile => "stale_lock_file",
            ErrorKind::DaemonStartTimeout => "daemon_start_timeout",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::IntegrityError => "integrity_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::SecurityError => "security_error",
            ErrorKind::ExecutionError => "execution_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the Stowage substrate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, subprocess plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid argument or illegal state transition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Stale daemon lock file.
    #[error("stale lock file: {0}")]
    StaleLockFile(String),

    /// Daemon start deadline exceeded.
    #[error("daemon start timeout: {0}")]
    DaemonStartTimeout(String),

    /// Backend offline or degraded.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Schema mismatch between stored and expected data.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Corruption or digest mismatch.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Operation cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Security policy rejection.
    #[error("security error: {0}")]
    Security(String),

    /// Generic execution failure.
    #[error("execution error: {0}")]
    Execution(String),
}

impl Error {
    /// Classify this error with a stable [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::ExecutionError,
            Error::Serialization(_) => ErrorKind::IntegrityError,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::StaleLockFile(_) => ErrorKind::StaleLockFile,
            Error::DaemonStartTimeout(_) => ErrorKind::DaemonStartTimeout,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Error::Integrity(_) => ErrorKind::IntegrityError,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Security(_) => ErrorKind::SecurityError,
            Error::Execution(_) => ErrorKind::ExecutionError,
        }
    }

    /// True if retrying the operation could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::BackendUnavailable | ErrorKind::ExecutionError
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

//! The `repo.lock` protocol.
//!
//! The daemon repository contains a lock file whose entire content is the
//! decimal PID of the holding process. A lock is *stale* when its content
//! does not parse as a PID or when no process with that PID is alive.
//! Liveness is probed with a zero-signal `kill`; `EPERM` counts as alive
//! (the process exists, it just is not ours).

use std::path::{Path, PathBuf};
use stowage_core::Result;
use tracing::debug;

/// Well-known lock file name inside a daemon repository.
pub const LOCK_FILE_NAME: &str = "repo.lock";

/// Outcome of inspecting a repository's lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lock file present.
    Absent,
    /// Lock held by a live process.
    Held { pid: i32 },
    /// Lock file exists but its PID is dead or unparseable.
    Stale { content: String },
}

/// True when a process with `pid` is currently alive.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Path of the lock file for a repository.
pub fn lock_path(repo: &Path) -> PathBuf {
    repo.join(LOCK_FILE_NAME)
}

/// Inspect the repository lock.
pub fn inspect(repo: &Path) -> Result<LockState> {
    let path = lock_path(repo);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Absent),
        Err(e) => return Err(e.into()),
    };
    let trimmed = content.trim();
    match trimmed.parse::<i32>() {
        Ok(pid) if pid_alive(pid) => {
            debug!(pid, "lock held by live process");
            Ok(LockState::Held { pid })
        }
        _ => Ok(LockState::Stale {
            content: trimmed.to_string(),
        }),
    }
}

/// Write a PID lock for `pid`, replacing any existing file.
pub fn write(repo: &Path, pid: i32) -> Result<()> {
    std::fs::create_dir_all(repo)?;
    std::fs::write(lock_path(repo), format!("{pid}\n"))?;
    Ok(())
}

/// Remove the lock file; absent is fine.
pub fn remove(repo: &Path) -> Result<()> {
    match std::fs::remove_file(lock_path(repo)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Modification time of the lock file, if present.
pub fn mtime(repo: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(lock_path(repo))
        .and_then(|m| m.modified())
        .ok()
}

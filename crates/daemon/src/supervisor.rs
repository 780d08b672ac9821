//! Daemon lifecycle with lock-file discipline.
//!
//! `daemon_start` implements the full decision tree: an existing lock held
//! by a live process short-circuits to `already_running`; a stale lock is
//! removed (or refused, per the caller); then exactly one of any number of
//! concurrent callers wins an exclusive intent file and spawns the daemon,
//! while losers wait for the winner's lock to appear. Every branch taken
//! is recorded in the returned [`DaemonStartReport`].

use crate::command::{CommandPolicy, SecureCommand};
use crate::lock::{self, LockState};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stowage_core::{Error, ErrorKind, Result};
use tracing::{debug, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Daemon repository (holds `repo.lock`).
    pub repo_path: PathBuf,
    /// Argument vector that launches the daemon, e.g. `["ipfs", "daemon"]`.
    pub command: Vec<String>,
    /// Environment passed to the daemon, e.g. `[("IPFS_PATH", ...)]`.
    pub env: Vec<(String, String)>,
    /// Overall deadline for `daemon_start`.
    pub start_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
    /// When true the supervisor writes the child's PID to `repo.lock`
    /// itself (for daemons that do not manage their own lock); when false
    /// the daemon is expected to write a fresh lock, and start verifies it.
    pub manage_lock_file: bool,
    /// Subprocess policy; the daemon binary must be on its allow-list.
    pub policy: CommandPolicy,
}

impl SupervisorOptions {
    /// Conventional options for an IPFS-style daemon in `repo_path`.
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> SupervisorOptions {
        let repo_path = repo_path.into();
        SupervisorOptions {
            env: vec![(
                "IPFS_PATH".to_string(),
                repo_path.to_string_lossy().into_owned(),
            )],
            repo_path,
            command: vec!["ipfs".to_string(), "daemon".to_string()],
            start_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            manage_lock_file: false,
            policy: CommandPolicy::default(),
        }
    }
}

/// Structured result of `daemon_start`, documenting every decision branch.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStartReport {
    pub success: bool,
    /// `"started"`, `"already_running"`, or `"error"`.
    pub status: String,
    pub lock_file_detected: bool,
    pub lock_is_stale: bool,
    pub lock_file_removed: bool,
    pub pid: Option<i32>,
    pub error: Option<String>,
    pub error_type: Option<ErrorKind>,
}

impl DaemonStartReport {
    fn new() -> DaemonStartReport {
        DaemonStartReport {
            success: false,
            status: "error".to_string(),
            lock_file_detected: false,
            lock_is_stale: false,
            lock_file_removed: false,
            pid: None,
            error: None,
            error_type: None,
        }
    }

    fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> DaemonStartReport {
        self.success = false;
        self.status = "error".to_string();
        self.error = Some(message.into());
        self.error_type = Some(kind);
        self
    }
}

/// Liveness snapshot from `daemon_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
}

/// Lock-file supervisor for the local content-addressed daemon.
pub struct DaemonSupervisor {
    options: SupervisorOptions,
}

impl DaemonSupervisor {
    pub fn new(options: SupervisorOptions) -> DaemonSupervisor {
        DaemonSupervisor { options }
    }

    pub fn repo_path(&self) -> &std::path::Path {
        &self.options.repo_path
    }

    /// Start the daemon if it is not already running.
    ///
    /// See the module docs for the decision tree. This never returns `Err`
    /// for protocol-level outcomes; every branch is reported in the
    /// [`DaemonStartReport`]. `Err` is reserved for unexpected I/O failure.
    pub fn daemon_start(&self, remove_stale_lock: bool) -> Result<DaemonStartReport> {
        let deadline = Instant::now() + self.options.start_timeout;
        let mut report = DaemonStartReport::new();
        let repo = &self.options.repo_path;
        std::fs::create_dir_all(repo)?;

        let prior_mtime = lock::mtime(repo);
        match lock::inspect(repo)? {
            LockState::Held { pid } => {
                report.lock_file_detected = true;
                report.success = true;
                report.status = "already_running".to_string();
                report.pid = Some(pid);
                debug!(pid, "daemon already running, not spawning");
                return Ok(report);
            }
            LockState::Stale { content } => {
                report.lock_file_detected = true;
                report.lock_is_stale = true;
                if !remove_stale_lock {
                    warn!(content, "stale lock present and removal disabled");
                    return Ok(report.fail(
                        ErrorKind::StaleLockFile,
                        format!("stale lock file present (content: {content:?})"),
                    ));
                }
                lock::remove(repo)?;
                report.lock_file_removed = true;
                info!(content, "removed stale daemon lock");
            }
            LockState::Absent => {}
        }

        // Winner election: exactly one concurrent caller creates the intent
        // file; everyone else waits for the winner's lock. An intent file
        // older than the start timeout belongs to a crashed winner and is
        // swept aside.
        let intent = repo.join("repo.lock.intent");
        let won = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&intent)
        {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let abandoned = std::fs::metadata(&intent)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .map_or(false, |age| age > self.options.start_timeout);
                if abandoned {
                    warn!("sweeping abandoned start-intent file");
                    let _ = std::fs::remove_file(&intent);
                }
                false
            }
            Err(e) => return Err(e.into()),
        };

        if !won {
            debug!("lost daemon start race, waiting for winner's lock");
            return self.wait_for_lock(deadline, report);
        }
        let _intent_guard = IntentGuard(intent);

        // An earlier winner may have finished (lock written, intent gone)
        // between our first inspection and winning the intent; re-inspect
        // so a second daemon is never spawned against a live lock.
        if let LockState::Held { pid } = lock::inspect(repo)? {
            report.lock_file_detected = true;
            report.success = true;
            report.status = "already_running".to_string();
            report.pid = Some(pid);
            return Ok(report);
        }

        let child_pid = SecureCommand::new(&self.options.policy, self.options.command.clone())
            .apply_env(&self.options.env)
            .spawn_reaped()? as i32;
        info!(pid = child_pid, "spawned daemon subprocess");

        if self.options.manage_lock_file {
            lock::write(repo, child_pid)?;
            report.success = true;
            report.status = "started".to_string();
            report.pid = Some(child_pid);
            return Ok(report);
        }

        // The daemon writes its own lock; verify a fresh one appears.
        loop {
            if let LockState::Held { pid } = lock::inspect(repo)? {
                let fresh = match (prior_mtime, lock::mtime(repo)) {
                    (Some(before), Some(now)) => now != before,
                    _ => true,
                };
                if fresh {
                    report.success = true;
                    report.status = "started".to_string();
                    report.pid = Some(pid);
                    return Ok(report);
                }
            }
            if Instant::now() >= deadline {
                warn!(pid = child_pid, "daemon did not write a fresh lock in time");
                return Ok(report.fail(
                    ErrorKind::DaemonStartTimeout,
                    format!(
                        "daemon (pid {child_pid}) did not produce a lock within {:?}",
                        self.options.start_timeout
                    ),
                ));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Loser path of the start race: observe the winner's lock.
    fn wait_for_lock(
        &self,
        deadline: Instant,
        mut report: DaemonStartReport,
    ) -> Result<DaemonStartReport> {
        loop {
            if let LockState::Held { pid } = lock::inspect(&self.options.repo_path)? {
                report.lock_file_detected = true;
                report.success = true;
                report.status = "already_running".to_string();
                report.pid = Some(pid);
                return Ok(report);
            }
            if Instant::now() >= deadline {
                return Ok(report.fail(
                    ErrorKind::DaemonStartTimeout,
                    "daemon start race winner never produced a lock",
                ));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Stop the daemon: SIGTERM, wait out the grace period, then SIGKILL.
    /// Idempotent; an absent or stale lock means "already stopped". The
    /// lock file is removed once the process is confirmed gone.
    pub fn daemon_stop(&self) -> Result<()> {
        let repo = &self.options.repo_path;
        let pid = match lock::inspect(repo)? {
            LockState::Held { pid } => pid,
            LockState::Stale { .. } => {
                lock::remove(repo)?;
                return Ok(());
            }
            LockState::Absent => return Ok(()),
        };

        debug!(pid, "sending SIGTERM to daemon");
        unsafe { libc::kill(pid, libc::SIGTERM) };
        let deadline = Instant::now() + self.options.stop_grace;
        while lock::pid_alive(pid) {
            if Instant::now() >= deadline {
                warn!(pid, "daemon ignored SIGTERM, sending SIGKILL");
                unsafe { libc::kill(pid, libc::SIGKILL) };
                // reap if it was our child; harmless otherwise
                std::thread::sleep(Duration::from_millis(100));
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        // a killed daemon cannot clean its own lock
        let mut waited = Duration::ZERO;
        while lock::pid_alive(pid) && waited < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(50));
            waited += Duration::from_millis(50);
        }
        if !lock::pid_alive(pid) {
            lock::remove(repo)?;
            info!(pid, "daemon stopped");
            Ok(())
        } else {
            Err(Error::Execution(format!(
                "daemon pid {pid} survived SIGKILL"
            )))
        }
    }

    /// Liveness snapshot derived from the lock file.
    pub fn daemon_status(&self) -> Result<DaemonStatus> {
        Ok(match lock::inspect(&self.options.repo_path)? {
            LockState::Held { pid } => DaemonStatus {
                running: true,
                pid: Some(pid),
            },
            _ => DaemonStatus {
                running: false,
                pid: None,
            },
        })
    }
}

/// Removes the intent file when the winner finishes (or fails).
struct IntentGuard(PathBuf);

impl Drop for IntentGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

trait ApplyEnv {
    fn apply_env(self, env: &[(String, String)]) -> Self;
}

impl ApplyEnv for SecureCommand {
    fn apply_env(self, env: &[(String, String)]) -> SecureCommand {
        env.iter()
            .fold(self, |cmd, (k, v)| cmd.env(k.clone(), v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Supervisor over a `sleep`-backed fake daemon with a managed lock.
    fn sleeper(repo: &std::path::Path) -> DaemonSupervisor {
        DaemonSupervisor::new(SupervisorOptions {
            repo_path: repo.to_path_buf(),
            command: vec!["sleep".to_string(), "30".to_string()],
            env: Vec::new(),
            start_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(200),
            manage_lock_file: true,
            policy: CommandPolicy::allowing(["sleep"]),
        })
    }

    #[test]
    fn clean_start_then_already_running_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());

        let first = supervisor.daemon_start(true).unwrap();
        assert!(first.success);
        assert_eq!(first.status, "started");
        assert!(!first.lock_file_detected);
        let pid = first.pid.unwrap();
        assert!(lock::pid_alive(pid));

        // second start does not spawn
        let second = supervisor.daemon_start(true).unwrap();
        assert!(second.success);
        assert_eq!(second.status, "already_running");
        assert_eq!(second.pid, Some(pid));
        assert!(!second.lock_is_stale);
        assert!(!second.lock_file_removed);

        supervisor.daemon_stop().unwrap();
        assert!(!lock::pid_alive(pid));
        assert_eq!(
            supervisor.daemon_status().unwrap(),
            DaemonStatus {
                running: false,
                pid: None
            }
        );
        // stop again: idempotent
        supervisor.daemon_stop().unwrap();
    }

    #[test]
    fn stale_lock_is_removed_and_start_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        lock::write(dir.path(), 999_999).unwrap();

        let report = supervisor.daemon_start(true).unwrap();
        assert!(report.lock_file_detected);
        assert!(report.lock_is_stale);
        assert!(report.lock_file_removed);
        assert!(report.success);
        assert_eq!(report.status, "started");
        // a fresh lock with a live pid exists
        assert!(matches!(
            lock::inspect(dir.path()).unwrap(),
            LockState::Held { .. }
        ));
        supervisor.daemon_stop().unwrap();
    }

    #[test]
    fn stale_lock_without_removal_fails_with_stable_kind() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        lock::write(dir.path(), 999_999).unwrap();

        let report = supervisor.daemon_start(false).unwrap();
        assert!(!report.success);
        assert!(report.lock_is_stale);
        assert!(!report.lock_file_removed);
        assert_eq!(report.error_type, Some(ErrorKind::StaleLockFile));
        // lock left in place
        assert!(matches!(
            lock::inspect(dir.path()).unwrap(),
            LockState::Stale { .. }
        ));
    }

    #[test]
    fn active_lock_with_callers_pid_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        lock::write(dir.path(), std::process::id() as i32).unwrap();

        let report = supervisor.daemon_start(true).unwrap();
        assert!(report.success);
        assert_eq!(report.status, "already_running");
        assert!(!report.lock_is_stale);
        assert!(!report.lock_file_removed);
        assert_eq!(report.pid, Some(std::process::id() as i32));
    }

    #[test]
    fn concurrent_starts_elect_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_path_buf();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let repo = repo.clone();
            handles.push(std::thread::spawn(move || {
                sleeper(&repo).daemon_start(true).unwrap()
            }));
        }
        let reports: Vec<DaemonStartReport> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let started = reports.iter().filter(|r| r.status == "started").count();
        let running = reports
            .iter()
            .filter(|r| r.status == "already_running")
            .count();
        assert_eq!(started, 1, "exactly one winner spawns");
        assert_eq!(started + running, 4, "losers observe the winner's lock");
        assert!(reports.iter().all(|r| r.success));

        sleeper(&repo).daemon_stop().unwrap();
    }

    #[test]
    fn rejected_binary_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = DaemonSupervisor::new(SupervisorOptions {
            repo_path: dir.path().to_path_buf(),
            command: vec!["bash".to_string(), "-c".to_string(), "true".to_string()],
            env: Vec::new(),
            start_timeout: Duration::from_secs(1),
            stop_grace: Duration::from_millis(100),
            manage_lock_file: true,
            policy: CommandPolicy::default(),
        });
        let err = supervisor.daemon_start(true).unwrap_err();
        assert!(matches!(err, Error::Security(_)));
        assert_eq!(lock::inspect(dir.path()).unwrap(), LockState::Absent);
    }
}

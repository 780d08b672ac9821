//! Secure subprocess invocation.
//!
//! Every process this crate creates goes through [`SecureCommand`]: an
//! argument vector (never a shell string), validated against a policy
//! before spawn. Rejections are raised locally as `security_error` and no
//! child process is ever created for them.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use stowage_core::{Error, Result};
use tracing::{debug, warn};

/// Binaries rejected unconditionally: shells, network fetchers, and
/// remote-execution tools have no business being spawned by a storage
/// daemon supervisor.
const DENIED_BINARIES: &[&str] = &[
    "sh", "bash", "zsh", "dash", "csh", "tcsh", "ksh", "fish", "curl", "wget", "nc", "ncat",
    "netcat", "socat", "ssh", "scp", "sftp", "rsync", "telnet", "ftp",
];

/// Allow/deny policy for subprocess creation.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
}

impl Default for CommandPolicy {
    /// The default policy permits only the content-addressed daemon binary.
    fn default() -> CommandPolicy {
        CommandPolicy::allowing(["ipfs"])
    }
}

impl CommandPolicy {
    /// Policy permitting exactly the given binary names.
    pub fn allowing<I, S>(binaries: I) -> CommandPolicy
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandPolicy {
            allowed: binaries.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate an argument vector. The deny-list wins over everything;
    /// afterwards the binary's base name must be explicitly allowed.
    pub fn validate(&self, argv: &[String]) -> Result<()> {
        let program = argv
            .first()
            .ok_or_else(|| Error::InvalidArgument("empty argument vector".into()))?;
        let base = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        if DENIED_BINARIES.contains(&base) {
            return Err(Error::Security(format!(
                "binary {base} is denied by policy"
            )));
        }
        if !self.allowed.contains(base) {
            return Err(Error::Security(format!(
                "binary {base} is not on the allow-list"
            )));
        }
        Ok(())
    }
}

/// Captured output of a completed (or killed) subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when the process died to a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// True when the deadline expired and the process was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A policy-checked subprocess invocation.
pub struct SecureCommand {
    argv: Vec<String>,
    env: Vec<(String, String)>,
    policy: CommandPolicy,
}

impl SecureCommand {
    pub fn new<I, S>(policy: &CommandPolicy, argv: I) -> SecureCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SecureCommand {
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            policy: policy.clone(),
        }
    }

    /// Pass one environment variable through to the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> SecureCommand {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run to completion under `timeout`, capturing stdout and stderr.
    ///
    /// On deadline expiry the child is killed and the partial output is
    /// returned with `timed_out = true`.
    pub fn run(self, timeout: Duration) -> Result<CommandOutput> {
        self.policy.validate(&self.argv)?;
        debug!(argv = ?self.argv, "running subprocess");

        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .envs(self.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Reader threads keep the pipes drained so a chatty child cannot
        // deadlock against a full pipe buffer.
        let stdout_handle = child.stdout.take().map(spawn_reader);
        let stderr_handle = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break Some(status),
                None if Instant::now() >= deadline => {
                    warn!(argv = ?self.argv, "subprocess deadline expired, killing");
                    let _ = child.kill();
                    timed_out = true;
                    break child.wait().ok();
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            timed_out,
        })
    }

    /// Spawn detached with stdio discarded, returning the child handle.
    /// Used for long-lived daemons the supervisor tracks by PID.
    pub fn spawn_detached(self) -> Result<Child> {
        self.policy.validate(&self.argv)?;
        debug!(argv = ?self.argv, "spawning detached subprocess");
        let child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .envs(self.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child)
    }

    /// Spawn detached and hand the child to a background reaper thread.
    ///
    /// The reaper blocks in `wait()` so the child never lingers as a
    /// zombie after it exits or is killed; liveness probes on the PID go
    /// false as soon as the process is gone. Returns the child's PID.
    pub fn spawn_reaped(self) -> Result<u32> {
        let mut child = self.spawn_detached()?;
        let pid = child.id();
        std::thread::Builder::new()
            .name("stowage-reaper".to_string())
            .spawn(move || {
                let _ = child.wait();
            })?;
        Ok(pid)
    }
}

fn spawn_reader(mut pipe: impl Read + Send + 'static) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

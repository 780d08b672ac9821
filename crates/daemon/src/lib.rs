//! Supervision of the local content-addressed daemon.
//!
//! Three concerns, layered bottom-up:
//!
//! - [`command`]: the only place subprocesses are created. Argument
//!   vectors only, an allow-list of permitted binaries, and a deny-list of
//!   shells / network fetchers / remote-exec tools that are rejected before
//!   any process exists.
//! - [`lock`]: the `repo.lock` protocol. The file holds the decimal PID of
//!   the owning process; a syntactically invalid or dead PID marks the lock
//!   stale.
//! - [`supervisor`]: start/stop/status with stale-lock handling and
//!   race-free acquisition: concurrent starts elect exactly one winner via
//!   an exclusive intent file, losers observe the winner's lock.

pub mod command;
pub mod lock;
pub mod supervisor;

pub use command::{CommandOutput, CommandPolicy, SecureCommand};
pub use lock::{pid_alive, LockState};
pub use supervisor::{DaemonStartReport, DaemonStatus, DaemonSupervisor, SupervisorOptions};

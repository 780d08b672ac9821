//! Backend probes.
//!
//! A probe answers one question: is the backend serving right now? Probes
//! run on the monitor thread behind a deadline; a probe that overruns its
//! timeout counts as failed, and a probe that panics is captured and
//! counted as failed rather than taking the monitor down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{Error, Result};

/// A health probe for one backend.
pub trait Probe: Send + Sync {
    /// Run one check. `Ok(true)` means healthy; `Ok(false)` and `Err` both
    /// count as failed, with `Err` additionally recorded as the backend's
    /// last error.
    fn check(&self) -> Result<bool>;
}

/// Probe backed by a closure; the usual way to wire remote backends.
pub struct FnProbe {
    f: Box<dyn Fn() -> Result<bool> + Send + Sync>,
}

impl FnProbe {
    pub fn new(f: impl Fn() -> Result<bool> + Send + Sync + 'static) -> FnProbe {
        FnProbe { f: Box::new(f) }
    }
}

impl Probe for FnProbe {
    fn check(&self) -> Result<bool> {
        (self.f)()
    }
}

/// Probe for local storage: the path exists and is writable.
///
/// Writability is proven by creating and removing a scratch file, not by
/// inspecting permission bits.
pub struct LocalPathProbe {
    path: PathBuf,
}

impl LocalPathProbe {
    pub fn new(path: impl Into<PathBuf>) -> LocalPathProbe {
        LocalPathProbe { path: path.into() }
    }
}

impl Probe for LocalPathProbe {
    fn check(&self) -> Result<bool> {
        if !self.path.is_dir() {
            return Ok(false);
        }
        match tempfile::Builder::new()
            .prefix(".stowage-probe-")
            .tempfile_in(&self.path)
        {
            Ok(file) => {
                drop(file); // removes the scratch file
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// Run `probe` with a deadline.
///
/// The probe executes on a helper thread; if it neither returns nor panics
/// within `timeout`, the result is a timeout error (counted as a failed
/// probe). An overrunning probe thread is detached; its late result is
/// discarded.
pub fn check_with_timeout(probe: &Arc<dyn Probe>, timeout: Duration) -> Result<bool> {
    let (tx, rx) = mpsc::channel();
    let probe = Arc::clone(probe);
    std::thread::Builder::new()
        .name("stowage-probe".to_string())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| probe.check()));
            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(Error::Execution("probe panicked".into())),
            };
            let _ = tx.send(result);
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "probe did not answer within {timeout:?}"
        ))),
    }
}

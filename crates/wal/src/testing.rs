//! Deterministic handlers for tests and demos.

use crate::handler::{BackendHandler, HandlerOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stowage_core::{ErrorKind, Operation};

enum Script {
    SucceedAfter { failures: usize, cid: String },
    AlwaysFail,
    Panic,
    Hang(Duration),
    Outcomes(Mutex<Vec<HandlerOutcome>>),
}

/// A handler that follows a fixed script, independent of wall clock or
/// randomness, and counts its attempts.
pub struct ScriptedHandler {
    script: Script,
    attempts: AtomicUsize,
}

impl ScriptedHandler {
    /// Fail the first `failures` attempts, then succeed with `cid`.
    pub fn succeed_after(failures: usize, cid: impl Into<String>) -> ScriptedHandler {
        ScriptedHandler {
            script: Script::SucceedAfter {
                failures,
                cid: cid.into(),
            },
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail every attempt with a transient-looking error.
    pub fn always_fail() -> ScriptedHandler {
        ScriptedHandler {
            script: Script::AlwaysFail,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Panic on every attempt.
    pub fn panicking() -> ScriptedHandler {
        ScriptedHandler {
            script: Script::Panic,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Sleep for `duration` on every attempt, then succeed.
    pub fn hanging(duration: Duration) -> ScriptedHandler {
        ScriptedHandler {
            script: Script::Hang(duration),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Replay explicit outcomes in order; repeats the last one when drained.
    pub fn outcomes(outcomes: Vec<HandlerOutcome>) -> ScriptedHandler {
        ScriptedHandler {
            script: Script::Outcomes(Mutex::new(outcomes)),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

impl BackendHandler for ScriptedHandler {
    fn handle(&self, _operation: &Operation) -> HandlerOutcome {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel);
        match &self.script {
            Script::SucceedAfter { failures, cid } => {
                if attempt < *failures {
                    HandlerOutcome::failed(
                        ErrorKind::BackendUnavailable,
                        "temporary service unavailable",
                    )
                } else {
                    HandlerOutcome::ok_with_cid(cid.clone())
                }
            }
            Script::AlwaysFail => {
                HandlerOutcome::failed(ErrorKind::ExecutionError, "operation failed")
            }
            Script::Panic => panic!("scripted handler panic"),
            Script::Hang(duration) => {
                std::thread::sleep(*duration);
                HandlerOutcome::ok()
            }
            Script::Outcomes(outcomes) => {
                let mut outcomes = outcomes.lock();
                if outcomes.len() > 1 {
                    outcomes.remove(0)
                } else {
                    outcomes.first().cloned().unwrap_or_else(HandlerOutcome::ok)
                }
            }
        }
    }
}

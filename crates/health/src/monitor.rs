//! The backend health monitor.

use crate::probe::{check_with_timeout, Probe};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stowage_core::{now_ms, Backend};
use tracing::{debug, error, info, warn};

/// Hysteresis-smoothed backend availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Unknown,
    Online,
    Degraded,
    Offline,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Unknown => "unknown",
            BackendState::Online => "online",
            BackendState::Degraded => "degraded",
            BackendState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one backend's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub state: BackendState,
    /// Recent probe results, oldest first; bounded by `history_size`.
    pub check_history: Vec<bool>,
    /// Time of the last probe, ms since epoch; 0 before the first probe.
    pub last_check: i64,
    /// Error from the most recent failed probe, if any.
    pub error: Option<String>,
}

impl Default for BackendHealth {
    fn default() -> BackendHealth {
        BackendHealth {
            state: BackendState::Unknown,
            check_history: Vec::new(),
            last_check: 0,
            error: None,
        }
    }
}

/// Callback invoked on derived-status changes: `(backend, old, new)`.
pub type StatusChangeCallback = Box<dyn Fn(Backend, BackendState, BackendState) + Send + Sync>;

/// Monitor tuning.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub check_interval: Duration,
    pub history_size: usize,
    pub probe_timeout: Duration,
    /// Spawn the probe thread on construction. Disable to drive probing
    /// manually with [`HealthMonitor::check_now`].
    pub autostart: bool,
}

impl Default for MonitorOptions {
    fn default() -> MonitorOptions {
        MonitorOptions {
            check_interval: Duration::from_secs(60),
            history_size: 25,
            probe_timeout: Duration::from_secs(10),
            autostart: true,
        }
    }
}

struct BackendSlot {
    probe: Arc<dyn Probe>,
    health: BackendHealth,
    history: VecDeque<bool>,
}

struct MonitorInner {
    options: MonitorOptions,
    slots: Mutex<BTreeMap<Backend, BackendSlot>>,
    callback: Mutex<Option<StatusChangeCallback>>,
    shutdown: AtomicBool,
    tick_lock: Mutex<()>,
    tick: Condvar,
}

/// Tracks per-backend availability and drives WAL scheduling.
///
/// One probe thread walks the registered backends every `check_interval`;
/// `close()` is idempotent and joins it.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor over `probes`. With `options.autostart` the probe
    /// thread runs immediately; the first round happens after one interval.
    pub fn new(
        options: MonitorOptions,
        probes: Vec<(Backend, Arc<dyn Probe>)>,
        callback: Option<StatusChangeCallback>,
    ) -> HealthMonitor {
        let mut slots = BTreeMap::new();
        for (backend, probe) in probes {
            slots.insert(
                backend,
                BackendSlot {
                    probe,
                    health: BackendHealth::default(),
                    history: VecDeque::new(),
                },
            );
        }
        let inner = Arc::new(MonitorInner {
            options,
            slots: Mutex::new(slots),
            callback: Mutex::new(callback),
            shutdown: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            tick: Condvar::new(),
        });

        let thread = if inner.options.autostart {
            let loop_inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name("stowage-health".to_string())
                .spawn(move || check_loop(&loop_inner))
                .expect("failed to spawn health monitor thread");
            info!("backend health monitor started");
            Some(handle)
        } else {
            None
        };

        HealthMonitor {
            inner,
            thread: Mutex::new(thread),
        }
    }

    /// Register or replace a probe after construction. The backend starts
    /// over in `Unknown` with an empty history.
    pub fn register_probe(&self, backend: Backend, probe: Arc<dyn Probe>) {
        self.inner.slots.lock().insert(
            backend,
            BackendSlot {
                probe,
                health: BackendHealth::default(),
                history: VecDeque::new(),
            },
        );
    }

    /// Run one full probe round synchronously on the caller's thread.
    pub fn check_now(&self) {
        run_probe_round(&self.inner);
    }

    /// Snapshot of one backend's health. Unregistered backends report
    /// `Unknown` with no history.
    pub fn status(&self, backend: Backend) -> BackendHealth {
        self.inner
            .slots
            .lock()
            .get(&backend)
            .map(|slot| slot.health.clone())
            .unwrap_or_default()
    }

    /// Snapshot of every registered backend.
    pub fn status_all(&self) -> BTreeMap<Backend, BackendHealth> {
        self.inner
            .slots
            .lock()
            .iter()
            .map(|(backend, slot)| (*backend, slot.health.clone()))
            .collect()
    }

    /// True iff the backend's derived status is `Online`.
    pub fn is_backend_available(&self, backend: Backend) -> bool {
        self.status(backend).state == BackendState::Online
    }

    /// Stop the probe thread and join it. Safe to call more than once.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.tick_lock.lock();
            self.inner.tick.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("health monitor thread did not stop cleanly");
            } else {
                info!("backend health monitor stopped");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_loop(inner: &Arc<MonitorInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        run_probe_round(inner);
        let mut guard = inner.tick_lock.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner
            .tick
            .wait_for(&mut guard, inner.options.check_interval);
    }
}

fn run_probe_round(inner: &Arc<MonitorInner>) {
    let backends: Vec<(Backend, Arc<dyn Probe>)> = inner
        .slots
        .lock()
        .iter()
        .map(|(backend, slot)| (*backend, Arc::clone(&slot.probe)))
        .collect();

    for (backend, probe) in backends {
        let outcome = check_with_timeout(&probe, inner.options.probe_timeout);
        let (healthy, probe_error) = match outcome {
            Ok(healthy) => (healthy, None),
            Err(e) => (false, Some(e.to_string())),
        };
        record_result(inner, backend, healthy, probe_error);
    }
}

fn record_result(
    inner: &Arc<MonitorInner>,
    backend: Backend,
    healthy: bool,
    probe_error: Option<String>,
) {
    let change = {
        let mut slots = inner.slots.lock();
        let Some(slot) = slots.get_mut(&backend) else {
            return;
        };
        slot.history.push_back(healthy);
        while slot.history.len() > inner.options.history_size {
            slot.history.pop_front();
        }

        let new_state = derive_state(&slot.history);
        let old_state = slot.health.state;
        slot.health = BackendHealth {
            state: new_state,
            check_history: slot.history.iter().copied().collect(),
            last_check: now_ms(),
            error: probe_error,
        };
        debug!(backend = %backend, healthy, state = %new_state, "probe recorded");
        (old_state != new_state).then_some((old_state, new_state))
    };

    // Callback runs outside the slot lock so it may query the monitor.
    if let Some((old, new)) = change {
        info!(backend = %backend, from = %old, to = %new, "backend status changed");
        let callback = inner.callback.lock();
        if let Some(cb) = callback.as_ref() {
            // a misbehaving callback must not take the probe thread down
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(backend, old, new)
            }));
            if result.is_err() {
                error!(backend = %backend, "status change callback panicked");
            }
        }
    }
}

/// Derive the smoothed state from the bounded history.
fn derive_state(history: &VecDeque<bool>) -> BackendState {
    if history.is_empty() {
        return BackendState::Unknown;
    }
    if history.len() >= 3 {
        let recent: Vec<bool> = history.iter().rev().take(3).copied().collect();
        if recent.iter().all(|&h| h) {
            BackendState::Online
        } else if recent.iter().all(|&h| !h) {
            BackendState::Offline
        } else {
            BackendState::Degraded
        }
    } else if *history.back().expect("non-empty") {
        BackendState::Online
    } else {
        BackendState::Offline
    }
}

//! Background deal monitoring.
//!
//! A single thread re-polls tracked deals on a fixed interval and invokes
//! a callback for every state change, so operators see deals publish and
//! activate without polling themselves.

use crate::api::DealInfo;
use crate::manager::DealManager;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Callback invoked for every observed deal state change.
pub type DealChangeCallback = Box<dyn Fn(&DealInfo) + Send + Sync>;

struct MonitorInner {
    manager: Arc<DealManager>,
    interval: Duration,
    callback: Option<DealChangeCallback>,
    shutdown: AtomicBool,
    tick_lock: Mutex<()>,
    tick: Condvar,
}

/// Handle to a running deal monitor; dropping it stops the thread.
pub struct MonitorHandle {
    inner: Arc<MonitorInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Stop the monitor thread and join it. Safe to call more than once.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.tick_lock.lock();
            self.inner.tick.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("deal monitor thread did not stop cleanly");
            } else {
                info!("deal monitor stopped");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Spawns the monitoring thread.
pub struct DealMonitor;

impl DealMonitor {
    pub fn start(
        manager: Arc<DealManager>,
        interval: Duration,
        callback: Option<DealChangeCallback>,
    ) -> MonitorHandle {
        let inner = Arc::new(MonitorInner {
            manager,
            interval,
            callback,
            shutdown: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            tick: Condvar::new(),
        });
        let loop_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("stowage-deals".to_string())
            .spawn(move || monitor_loop(&loop_inner))
            .expect("failed to spawn deal monitor thread");
        info!("deal monitor started");
        MonitorHandle {
            inner,
            thread: Mutex::new(Some(handle)),
        }
    }
}

fn monitor_loop(inner: &Arc<MonitorInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        match inner.manager.refresh() {
            Ok(changed) => {
                if let Some(callback) = &inner.callback {
                    for deal in &changed {
                        callback(deal);
                    }
                }
            }
            Err(e) => error!(error = %e, "deal refresh round failed"),
        }
        let mut guard = inner.tick_lock.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.tick.wait_for(&mut guard, inner.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DealState, MockMarketApi};
    use crate::manager::DealPolicy;

    #[test]
    fn monitor_reports_state_changes_until_stable() {
        let manager = Arc::new(DealManager::new(Arc::new(MockMarketApi::new())));
        manager
            .store_redundant(
                "bafymonitored",
                &DealPolicy {
                    redundancy: 1,
                    ..DealPolicy::default()
                },
            )
            .unwrap();

        let seen: Arc<Mutex<Vec<DealState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = DealMonitor::start(
            Arc::clone(&manager),
            Duration::from_millis(10),
            Some(Box::new(move |deal| sink.lock().push(deal.state))),
        );

        // two transitions to observe: proposed -> published -> active
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.close();
        handle.close();

        let states = seen.lock().clone();
        assert_eq!(states[..2], [DealState::Published, DealState::Active]);
        assert!(manager.content_health("bafymonitored").healthy);
    }
}

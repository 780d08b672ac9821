//! The WAL processor: finds work, dispatches it, records outcomes.
//!
//! One long-lived worker thread ticks every `process_interval`:
//!
//! 1. Pending operations (and retrying operations whose backoff has
//!    elapsed) are enqueued if the health monitor reports their backend
//!    online. Without a monitor, everything is eligible.
//! 2. The queue drains: each operation transitions to `Processing`, runs
//!    its backend handler under a deadline, and lands in `Completed`,
//!    `Retrying` (with `next_retry_at = now + retry_delay`), or `Failed`.
//! 3. The worker sleeps on a condvar until the next tick or a wakeup.
//!
//! Handler panics and timeouts are failure outcomes, never crashes of the
//! worker. Cancellation races dispatch: whichever writes its terminal
//! status first wins, and the loser's update is rejected by the store's
//! transition validation and dropped.

use crate::handler::{HandlerOutcome, HandlerRegistry};
use crate::store::{StatusUpdate, WalStore};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stowage_core::{now_ms, Config, Error, ErrorKind, Operation, OperationStatus, Result};
use stowage_health::HealthMonitor;
use tracing::{debug, error, info, warn};

/// Processor tuning, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub process_interval: Duration,
    pub retry_delay: Duration,
    pub operation_timeout: Duration,
}

impl ProcessorOptions {
    pub fn from_config(config: &Config) -> ProcessorOptions {
        ProcessorOptions {
            process_interval: config.process_interval(),
            retry_delay: config.retry_delay(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

struct ProcessorInner {
    store: Arc<WalStore>,
    health: Option<Arc<HealthMonitor>>,
    handlers: Arc<HandlerRegistry>,
    options: ProcessorOptions,
    queue: Mutex<VecDeque<String>>,
    shutdown: AtomicBool,
    tick_lock: Mutex<()>,
    tick: Condvar,
}

/// Scheduler for pending WAL operations.
pub struct WalProcessor {
    inner: Arc<ProcessorInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WalProcessor {
    /// Create a processor. Call [`WalProcessor::start`] to spawn the worker.
    pub fn new(
        store: Arc<WalStore>,
        health: Option<Arc<HealthMonitor>>,
        handlers: Arc<HandlerRegistry>,
        options: ProcessorOptions,
    ) -> WalProcessor {
        WalProcessor {
            inner: Arc::new(ProcessorInner {
                store,
                health,
                handlers,
                options,
                queue: Mutex::new(VecDeque::new()),
                shutdown: AtomicBool::new(false),
                tick_lock: Mutex::new(()),
                tick: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Idempotent while running.
    pub fn start(&self) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        self.inner.shutdown.store(false, Ordering::Release);
        self.inner.store.set_processing_active(true);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("stowage-wal-proc".to_string())
            .spawn(move || worker_loop(&inner))
            .expect("failed to spawn WAL processor thread");
        *thread = Some(handle);
        info!("WAL processor started");
    }

    /// Run one scheduling pass synchronously on the caller's thread.
    /// Used by tests and by callers that want immediate dispatch after an
    /// append instead of waiting out the tick.
    pub fn process_once(&self) {
        schedule_eligible(&self.inner);
        drain_queue(&self.inner);
    }

    /// Wake the worker immediately (e.g. after appending an operation).
    pub fn wakeup(&self) {
        let _guard = self.inner.tick_lock.lock();
        self.inner.tick.notify_all();
    }

    /// Cancel an operation.
    ///
    /// Valid from `Pending`, `Processing`, or `Retrying`; the operation
    /// lands in `Failed` with the canonical cancellation kind. Returns
    /// `Ok(true)` when this call performed the cancellation, `Ok(false)`
    /// when the operation was already cancelled (idempotent no-op), and an
    /// error when it already completed.
    pub fn cancel_operation(&self, operation_id: &str) -> Result<bool> {
        let operation = self
            .inner
            .store
            .get_operation(operation_id)?
            .ok_or_else(|| Error::NotFound(format!("operation not found: {operation_id}")))?;
        match operation.status {
            OperationStatus::Pending
            | OperationStatus::Processing
            | OperationStatus::Retrying => {
                self.inner.store.update_operation_status(
                    operation_id,
                    OperationStatus::Failed,
                    StatusUpdate {
                        error: Some("operation cancelled".into()),
                        error_type: Some(ErrorKind::Cancelled.as_str().to_string()),
                        ..Default::default()
                    },
                )?;
                info!(operation_id, "operation cancelled");
                Ok(true)
            }
            OperationStatus::Failed => Ok(false),
            OperationStatus::Completed => Err(Error::InvalidArgument(format!(
                "operation {operation_id} already completed"
            ))),
        }
    }

    /// Stop the worker and join it. Safe to call more than once.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.tick_lock.lock();
            self.inner.tick.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("WAL processor thread did not stop cleanly");
            } else {
                info!("WAL processor stopped");
            }
        }
        self.inner.store.set_processing_active(false);
    }
}

impl Drop for WalProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(inner: &Arc<ProcessorInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        schedule_eligible(inner);
        drain_queue(inner);
        let mut guard = inner.tick_lock.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner
            .tick
            .wait_for(&mut guard, inner.options.process_interval);
    }
}

/// Enqueue pending work whose backend is online, plus retrying work whose
/// backoff has elapsed.
fn schedule_eligible(inner: &Arc<ProcessorInner>) {
    let mut eligible = Vec::new();
    match inner.store.get_operations_by_status(OperationStatus::Pending, None) {
        Ok(ops) => eligible.extend(ops),
        Err(e) => {
            error!(error = %e, "failed to list pending operations");
            return;
        }
    }
    match inner
        .store
        .get_operations_by_status(OperationStatus::Retrying, None)
    {
        Ok(ops) => {
            let now = now_ms();
            eligible.extend(
                ops.into_iter()
                    .filter(|op| op.next_retry_at.map_or(true, |at| at <= now)),
            );
        }
        Err(e) => error!(error = %e, "failed to list retrying operations"),
    }

    let mut queue = inner.queue.lock();
    for op in eligible {
        if let Some(health) = &inner.health {
            if !health.is_backend_available(op.backend) {
                debug!(
                    operation_id = %op.operation_id,
                    backend = %op.backend,
                    "backend not online, deferring operation"
                );
                continue;
            }
        }
        if !queue.contains(&op.operation_id) {
            queue.push_back(op.operation_id);
        }
    }
}

fn drain_queue(inner: &Arc<ProcessorInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        let Some(operation_id) = inner.queue.lock().pop_front() else {
            return;
        };
        dispatch_one(inner, &operation_id);
    }
}

/// Drive one operation through `Processing` to an outcome state.
fn dispatch_one(inner: &Arc<ProcessorInner>, operation_id: &str) {
    let operation = match inner.store.get_operation(operation_id) {
        Ok(Some(op)) => op,
        Ok(None) => {
            warn!(operation_id, "queued operation vanished");
            return;
        }
        Err(e) => {
            error!(operation_id, error = %e, "failed to load queued operation");
            return;
        }
    };
    if !matches!(
        operation.status,
        OperationStatus::Pending | OperationStatus::Retrying
    ) {
        debug!(operation_id, status = %operation.status, "skipping non-dispatchable operation");
        return;
    }

    if inner
        .store
        .update_operation_status(operation_id, OperationStatus::Processing, StatusUpdate::default())
        .is_err()
    {
        // lost a race (e.g. concurrent cancellation); nothing to do
        return;
    }

    let outcome = match inner.handlers.get(operation.backend) {
        Some(handler) => run_handler(handler, &operation, inner.options.operation_timeout),
        None => HandlerOutcome::failed(
            ErrorKind::ExecutionError,
            format!("no handler registered for backend {}", operation.backend),
        ),
    };

    let update_result = if outcome.success {
        inner.store.update_operation_status(
            operation_id,
            OperationStatus::Completed,
            StatusUpdate {
                completed_at: Some(now_ms()),
                result: Some(outcome.result()),
                ..Default::default()
            },
        )
    } else if operation.retry_count < operation.max_retries {
        inner.store.update_operation_status(
            operation_id,
            OperationStatus::Retrying,
            StatusUpdate {
                retry_count: Some(operation.retry_count + 1),
                next_retry_at: Some(now_ms() + inner.options.retry_delay.as_millis() as i64),
                error: outcome.error.clone(),
                error_type: outcome.error_type.clone(),
                ..Default::default()
            },
        )
    } else {
        inner.store.update_operation_status(
            operation_id,
            OperationStatus::Failed,
            StatusUpdate {
                error: outcome.error.clone(),
                error_type: outcome.error_type.clone(),
                ..Default::default()
            },
        )
    };

    match update_result {
        Ok(updated) => debug!(
            operation_id,
            status = %updated.status,
            retry_count = updated.retry_count,
            "dispatch recorded"
        ),
        // a concurrent cancellation made the row terminal first; its state wins
        Err(e) => debug!(operation_id, error = %e, "dispatch result dropped"),
    }
}

/// Run a handler under the per-operation deadline.
///
/// The handler runs on a helper thread; a deadline miss or panic becomes a
/// failure outcome. An overrunning handler thread is detached and its late
/// result discarded.
fn run_handler(
    handler: Arc<dyn crate::handler::BackendHandler>,
    operation: &Operation,
    timeout: Duration,
) -> HandlerOutcome {
    let (tx, rx) = mpsc::channel();
    let op = operation.clone();
    let spawned = std::thread::Builder::new()
        .name("stowage-wal-dispatch".to_string())
        .spawn(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| handler.handle(&op))) {
                Ok(outcome) => outcome,
                Err(_) => HandlerOutcome::failed(ErrorKind::ExecutionError, "handler panicked"),
            };
            let _ = tx.send(outcome);
        });
    if spawned.is_err() {
        return HandlerOutcome::failed(ErrorKind::ExecutionError, "failed to spawn dispatch thread");
    }
    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(_) => HandlerOutcome::failed(
            ErrorKind::Timeout,
            format!("dispatch exceeded {timeout:?}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WalOptions;
    use crate::testing::ScriptedHandler;
    use stowage_core::{Backend, CompressionCodec, OperationType, PartitionFormat};

    fn fast_options() -> ProcessorOptions {
        ProcessorOptions {
            process_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(0),
            operation_timeout: Duration::from_secs(2),
        }
    }

    fn open_store(dir: &std::path::Path) -> Arc<WalStore> {
        Arc::new(
            WalStore::open(WalOptions {
                base_path: dir.to_path_buf(),
                partition_size: 100,
                archive_completed: true,
                compression: CompressionCodec::None,
                row_group_size: 64,
                format: PartitionFormat::Parquet,
            })
            .unwrap(),
        )
    }

    fn processor_with(
        store: &Arc<WalStore>,
        backend: Backend,
        handler: Arc<dyn crate::handler::BackendHandler>,
    ) -> WalProcessor {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(backend, handler);
        WalProcessor::new(Arc::clone(store), None, handlers, fast_options())
    }

    #[test]
    fn success_path_records_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::succeed_after(0, "bafysuccess"));
        let proc = processor_with(&store, Backend::Ipfs, handler);

        let op = store
            .append(Operation::new(OperationType::Add, Backend::Ipfs).with_max_retries(3))
            .unwrap();
        proc.process_once();

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(
            done.result.as_ref().and_then(|r| r.cid.as_deref()),
            Some("bafysuccess")
        );
    }

    #[test]
    fn fails_twice_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::succeed_after(2, "bafythird"));
        let proc = processor_with(&store, Backend::Storacha, handler);

        let op = store
            .append(Operation::new(OperationType::Upload, Backend::Storacha).with_max_retries(5))
            .unwrap();
        // attempt 1 (fail) + attempt 2 (fail) + attempt 3 (success)
        proc.process_once();
        proc.process_once();
        proc.process_once();

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.retry_count, 2);
        assert!(done.result.is_some());
    }

    #[test]
    fn exhausted_retries_fail_terminally() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::always_fail());
        let proc = processor_with(&store, Backend::S3, handler);

        let op = store
            .append(Operation::new(OperationType::Upload, Backend::S3).with_max_retries(2))
            .unwrap();
        for _ in 0..5 {
            proc.process_once();
        }

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Failed);
        assert_eq!(done.retry_count, 2);
        assert!(done.error.is_some());
    }

    #[test]
    fn handler_panic_is_a_failure_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::panicking());
        let proc = processor_with(&store, Backend::Custom, handler);

        let op = store
            .append(Operation::new(OperationType::Custom, Backend::Custom))
            .unwrap();
        proc.process_once();

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        // max_retries = 0: first failure is terminal
        assert_eq!(done.status, OperationStatus::Failed);
        assert_eq!(done.error_type.as_deref(), Some("execution_error"));
    }

    #[test]
    fn dispatch_timeout_is_a_failure_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::hanging(Duration::from_secs(5)));
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Backend::Filecoin, handler as Arc<dyn crate::handler::BackendHandler>);
        let proc = WalProcessor::new(
            Arc::clone(&store),
            None,
            handlers,
            ProcessorOptions {
                operation_timeout: Duration::from_millis(50),
                ..fast_options()
            },
        );

        let op = store
            .append(Operation::new(OperationType::Get, Backend::Filecoin))
            .unwrap();
        proc.process_once();

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Failed);
        assert_eq!(done.error_type.as_deref(), Some("timeout"));
    }

    #[test]
    fn missing_handler_fails_operation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let proc = WalProcessor::new(
            Arc::clone(&store),
            None,
            Arc::new(HandlerRegistry::new()),
            fast_options(),
        );
        let op = store
            .append(Operation::new(OperationType::Add, Backend::Ipfs))
            .unwrap();
        proc.process_once();
        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Failed);
        assert!(done.error.unwrap().contains("no handler"));
    }

    #[test]
    fn cancellation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let proc = WalProcessor::new(
            Arc::clone(&store),
            None,
            Arc::new(HandlerRegistry::new()),
            fast_options(),
        );
        let op = store
            .append(Operation::new(OperationType::Pin, Backend::Ipfs))
            .unwrap();

        assert!(proc.cancel_operation(&op.operation_id).unwrap());
        // second cancel is a no-op
        assert!(!proc.cancel_operation(&op.operation_id).unwrap());

        let done = store.get_operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Failed);
        assert_eq!(done.error_type.as_deref(), Some("cancelled"));
    }

    #[test]
    fn cancelling_completed_operation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::succeed_after(0, "bafy"));
        let proc = processor_with(&store, Backend::Local, handler);
        let op = store
            .append(Operation::new(OperationType::Add, Backend::Local))
            .unwrap();
        proc.process_once();
        let err = proc.cancel_operation(&op.operation_id).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn worker_thread_processes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let handler = Arc::new(ScriptedHandler::succeed_after(0, "bafybg"));
        let proc = processor_with(&store, Backend::Ipfs, handler);
        proc.start();

        let op = store
            .append(Operation::new(OperationType::Add, Backend::Ipfs))
            .unwrap();
        proc.wakeup();
        let done = store
            .wait_for_operation(&op.operation_id, Duration::from_secs(5))
            .unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        proc.close();
        proc.close();
        assert!(!store.get_statistics().unwrap().processing_active);
    }
}

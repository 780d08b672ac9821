//! WAL scenarios: retry lifecycles, archival disjointness, health gating.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stowage::{Backend, Operation, OperationStatus, OperationType};
use stowage_core::{CompressionCodec, PartitionFormat};
use stowage_health::{FnProbe, HealthMonitor, MonitorOptions, Probe};
use stowage_wal::testing::ScriptedHandler;
use stowage_wal::{HandlerRegistry, ProcessorOptions, WalOptions, WalProcessor, WalStore};

fn open_store(dir: &Path) -> Arc<WalStore> {
    Arc::new(
        WalStore::open(WalOptions {
            base_path: dir.to_path_buf(),
            partition_size: 4,
            archive_completed: true,
            compression: CompressionCodec::None,
            row_group_size: 64,
            format: PartitionFormat::Parquet,
        })
        .unwrap(),
    )
}

fn fast_options() -> ProcessorOptions {
    ProcessorOptions {
        process_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(0),
        operation_timeout: Duration::from_secs(2),
    }
}

#[test]
fn handler_fails_twice_then_succeeds_on_third_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let handler = Arc::new(ScriptedHandler::succeed_after(2, "bafyretried"));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(Backend::Storacha, handler.clone());
    let processor = WalProcessor::new(Arc::clone(&store), None, handlers, fast_options());

    let op = store
        .append(Operation::new(OperationType::Upload, Backend::Storacha).with_max_retries(5))
        .unwrap();

    for _ in 0..3 {
        processor.process_once();
    }

    let done = store.get_operation(&op.operation_id).unwrap().unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.retry_count, 2);
    assert_eq!(
        done.result.as_ref().and_then(|r| r.cid.as_deref()),
        Some("bafyretried")
    );
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());
    assert_eq!(handler.attempts(), 3);
}

#[test]
fn archived_operations_never_reappear_in_live_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(Backend::Local, Arc::new(ScriptedHandler::succeed_after(0, "bafy")));
    let processor = WalProcessor::new(Arc::clone(&store), None, handlers, fast_options());

    let mut completed_ids = Vec::new();
    for _ in 0..6 {
        let op = store
            .append(Operation::new(OperationType::Add, Backend::Local))
            .unwrap();
        completed_ids.push(op.operation_id);
    }
    processor.process_once();

    // every operation is terminal and archived
    let stats = store.get_statistics().unwrap();
    assert_eq!(stats.completed, 6);
    assert!(stats.archives >= 1);

    // the live set holds none of the archived ids
    for status in [
        OperationStatus::Pending,
        OperationStatus::Processing,
        OperationStatus::Retrying,
        OperationStatus::Failed,
    ] {
        for op in store.get_operations_by_status(status, None).unwrap() {
            assert!(!completed_ids.contains(&op.operation_id));
        }
    }
    // yet each remains findable through the archive scan
    for id in &completed_ids {
        let found = store.get_operation(id).unwrap().unwrap();
        assert_eq!(found.status, OperationStatus::Completed);
    }
}

#[test]
fn offline_backend_defers_dispatch_until_online() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    // a probe that fails until told otherwise
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let probe: Arc<dyn Probe> = Arc::new(FnProbe::new(move || {
        Ok(flag.load(std::sync::atomic::Ordering::Acquire))
    }));
    let monitor = Arc::new(HealthMonitor::new(
        MonitorOptions {
            check_interval: Duration::from_millis(10),
            history_size: 5,
            probe_timeout: Duration::from_secs(1),
            autostart: false,
        },
        vec![(Backend::S3, probe)],
        None,
    ));

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(Backend::S3, Arc::new(ScriptedHandler::succeed_after(0, "bafys3")));
    let processor = WalProcessor::new(
        Arc::clone(&store),
        Some(Arc::clone(&monitor)),
        handlers,
        fast_options(),
    );

    let op = store
        .append(Operation::new(OperationType::Upload, Backend::S3))
        .unwrap();

    // backend offline: the operation stays pending
    monitor.check_now();
    processor.process_once();
    assert_eq!(
        store.get_operation(&op.operation_id).unwrap().unwrap().status,
        OperationStatus::Pending
    );

    // three healthy probes bring the backend online; dispatch proceeds
    healthy.store(true, std::sync::atomic::Ordering::Release);
    for _ in 0..3 {
        monitor.check_now();
    }
    processor.process_once();
    assert_eq!(
        store.get_operation(&op.operation_id).unwrap().unwrap().status,
        OperationStatus::Completed
    );
}

#[test]
fn partition_rotation_under_load_preserves_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(
            store
                .append(Operation::new(OperationType::Pin, Backend::Ipfs))
                .unwrap()
                .operation_id,
        );
    }
    // partition_size = 4: ten appends span three partitions
    let stats = store.get_statistics().unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.partitions, 3);
    for id in &ids {
        assert!(store.get_operation(id).unwrap().is_some());
    }
}

//! Whole-substrate integration through the facade.

use std::sync::Arc;
use std::time::Duration;
use stowage::columnar::{Column, ColumnData, Table};
use stowage::{
    Backend, Config, ContentClient, Operation, OperationStatus, OperationType, Stowage,
};
use stowage_wal::testing::ScriptedHandler;

fn test_config(root: &std::path::Path) -> Config {
    Config {
        process_interval_secs: 1,
        check_interval_secs: 1,
        retry_delay_secs: 0,
        ..Config::rooted(root)
    }
}

#[test]
fn operation_flows_through_wal_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();
    stowage.register_handler(
        Backend::Local,
        Arc::new(ScriptedHandler::succeed_after(0, "bafyfacade")),
    );

    // the Local probe needs three healthy rounds before dispatch is allowed
    for _ in 0..3 {
        stowage.health().check_now();
    }
    assert!(stowage.health().is_backend_available(Backend::Local));

    let op = stowage
        .append_operation(
            Operation::new(OperationType::Add, Backend::Local)
                .with_parameter("path", "/tmp/payload")
                .with_max_retries(2),
        )
        .unwrap();

    let done = stowage
        .wal()
        .wait_for_operation(&op.operation_id, Duration::from_secs(10))
        .unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(
        done.result.as_ref().and_then(|r| r.cid.as_deref()),
        Some("bafyfacade")
    );

    let stats = stowage.wal().get_statistics().unwrap();
    assert!(stats.processing_active);
    assert_eq!(stats.completed, 1);

    stowage.close();
    stowage.close();
    assert!(!stowage.wal().get_statistics().unwrap().processing_active);
}

#[test]
fn bridge_and_vfs_are_wired_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();

    let table = Table::from_columns(vec![Column::new(
        "n",
        ColumnData::Int64(vec![Some(1), Some(2), Some(3)]),
    )])
    .unwrap();
    let receipt = stowage
        .bridge()
        .store(&table, Some("numbers"), None, None)
        .unwrap();

    assert!(stowage.vfs().exists(&format!("/datasets/{}", receipt.cid)));
    let back = stowage
        .bridge()
        .retrieve(&receipt.cid, None, Vec::new(), true)
        .unwrap();
    assert_eq!(back.table, table);
    stowage.close();
}

#[test]
fn wal_journal_records_bridge_stores_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        enable_wal: true,
        // keep the processor quiescent so the journal's synchronous status
        // updates cannot race a dispatch attempt
        process_interval_secs: 3600,
        ..test_config(dir.path())
    };
    let stowage = Stowage::open(config).unwrap();
    let table = Table::from_columns(vec![Column::new(
        "n",
        ColumnData::Int64(vec![Some(42)]),
    )])
    .unwrap();
    let receipt = stowage.bridge().store(&table, None, None, None).unwrap();

    let completed = stowage
        .wal()
        .get_operations_by_status(OperationStatus::Completed, None)
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(
        completed[0].parameters.get("cid"),
        Some(&receipt.cid)
    );
    stowage.close();
}

#[test]
fn normalized_client_is_simulated_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();

    let added = stowage.client().add(b"facade content").unwrap();
    assert!(added.simulated);
    let cat = stowage.client().cat(&added.cid).unwrap();
    assert_eq!(cat.data, b"facade content");

    let stats = stowage.client().get_stats();
    assert_eq!(stats.operation_stats.get("add").unwrap().count, 1);
    assert_eq!(stats.operation_stats.get("cat").unwrap().count, 1);
    stowage.close();
}

#[test]
fn cancellation_through_the_facade_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();
    // no handler registered and backend never probed online: stays pending
    let op = stowage
        .append_operation(Operation::new(OperationType::Pin, Backend::S3))
        .unwrap();

    assert!(stowage.cancel_operation(&op.operation_id).unwrap());
    assert!(!stowage.cancel_operation(&op.operation_id).unwrap());

    let cancelled = stowage
        .wal()
        .get_operation(&op.operation_id)
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, OperationStatus::Failed);
    assert_eq!(cancelled.error_type.as_deref(), Some("cancelled"));
    stowage.close();
}

#[test]
fn market_operations_flow_through_the_wal() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();
    let manager = stowage.attach_market(
        Arc::new(stowage::MockMarketApi::new()),
        stowage::DealPolicy {
            redundancy: 2,
            ..stowage::DealPolicy::default()
        },
    );

    // the market backend has no probe; register one that is always up and
    // let three rounds bring it online
    stowage.health().register_probe(
        Backend::Filecoin,
        Arc::new(stowage_health::FnProbe::new(|| Ok(true))),
    );
    for _ in 0..3 {
        stowage.health().check_now();
    }

    let op = stowage
        .append_operation(
            Operation::new(OperationType::Upload, Backend::Filecoin)
                .with_parameter("cid", "bafymarketflow"),
        )
        .unwrap();
    let done = stowage
        .wal()
        .wait_for_operation(&op.operation_id, Duration::from_secs(10))
        .unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    // the result records the placed deal ids
    let destination = done.result.unwrap().destination.unwrap();
    assert_eq!(destination.split(',').count(), 2);

    // deals activate after two refresh rounds
    manager.refresh().unwrap();
    manager.refresh().unwrap();
    assert!(manager.content_health("bafymarketflow").healthy);

    // telemetry reflects the completed market operation
    let telemetry = stowage_wal::telemetry::collect(stowage.wal()).unwrap();
    assert_eq!(telemetry.by_backend["filecoin"].completed, 1);
    stowage.close();
}

#[test]
fn ipfs_operations_dispatch_through_the_content_client() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = Stowage::open(test_config(dir.path())).unwrap();

    // bring the daemon backend online without a real daemon: the probe
    // reads the lock file, so hold a lock with our own (live) pid
    std::fs::create_dir_all(&stowage.config().repo_path).unwrap();
    std::fs::write(
        stowage.config().repo_path.join("repo.lock"),
        format!("{}", std::process::id()),
    )
    .unwrap();
    for _ in 0..3 {
        stowage.health().check_now();
    }
    assert!(stowage.health().is_backend_available(Backend::Ipfs));

    let op = stowage
        .append_operation(
            Operation::new(OperationType::Add, Backend::Ipfs)
                .with_parameter("content", "dispatched payload"),
        )
        .unwrap();
    let done = stowage
        .wal()
        .wait_for_operation(&op.operation_id, Duration::from_secs(10))
        .unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    let cid = done.result.unwrap().cid.unwrap();

    // the content is readable back through the normalized client
    assert_eq!(
        stowage.client().cat(&cid).unwrap().data,
        b"dispatched payload"
    );
    stowage.close();
}

#[test]
fn global_instance_lifecycle_is_explicit() {
    let dir = tempfile::tempdir().unwrap();
    assert!(stowage::global().is_none());

    let instance = stowage::init_global(test_config(dir.path())).unwrap();
    assert!(Arc::ptr_eq(&instance, &stowage::global().unwrap()));
    // double init is rejected while one is live
    assert!(stowage::init_global(test_config(dir.path())).is_err());

    stowage::shutdown_global();
    assert!(stowage::global().is_none());
    // shutdown is idempotent
    stowage::shutdown_global();
}

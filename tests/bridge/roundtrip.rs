//! Bridge scenarios: determinism, round trips, and the VFS read-through.

use std::collections::BTreeMap;
use std::sync::Arc;
use stowage::columnar::{Column, ColumnData, Table};
use stowage::{Error, VirtualFileSystem};
use stowage_bridge::{BridgeOptions, ColumnarBridge};
use stowage_core::CompressionCodec;

fn hundred_row_table() -> Table {
    Table::from_columns(vec![
        Column::new("id", ColumnData::Int64((0..100).map(Some).collect())),
        Column::new(
            "label",
            ColumnData::Utf8((0..100).map(|i| Some(format!("row-{i}"))).collect()),
        ),
        Column::new(
            "weight",
            ColumnData::Float64((0..100).map(|i| Some(i as f64 / 7.0)).collect()),
        ),
    ])
    .unwrap()
}

fn open_bridge(base: &std::path::Path) -> ColumnarBridge {
    ColumnarBridge::open(
        BridgeOptions {
            base_path: base.to_path_buf(),
            compression: CompressionCodec::Zstd,
            row_group_size: 32,
            max_partition_size: 64 * 1024 * 1024,
            cache_capacity: 8,
            enable_wal: false,
            enable_replication: false,
        },
        None,
        None,
    )
    .unwrap()
}

#[test]
fn storing_a_hundred_row_table_twice_is_fully_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let metadata = BTreeMap::from([("k".to_string(), "v".to_string())]);

    let first = bridge
        .store(&hundred_row_table(), Some("t"), Some(metadata.clone()), None)
        .unwrap();
    let first_sidecar = bridge.sidecar_bytes(&first.cid).unwrap();

    let second = bridge
        .store(&hundred_row_table(), Some("t"), Some(metadata), None)
        .unwrap();
    let second_sidecar = bridge.sidecar_bytes(&second.cid).unwrap();

    assert_eq!(first.cid, second.cid);
    assert_eq!(first_sidecar, second_sidecar);
}

#[test]
fn retrieve_returns_the_stored_table_up_to_projection() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let table = hundred_row_table();
    let receipt = bridge.store(&table, None, None, None).unwrap();

    let full = bridge.retrieve(&receipt.cid, None, Vec::new(), true).unwrap();
    assert_eq!(full.table, table);

    let projected = bridge
        .retrieve(
            &receipt.cid,
            Some(vec!["label".to_string()]),
            Vec::new(),
            true,
        )
        .unwrap();
    assert_eq!(
        projected.table,
        table.project(&["label".to_string()]).unwrap()
    );
}

#[test]
fn delete_then_retrieve_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge.store(&hundred_row_table(), None, None, None).unwrap();
    bridge.delete(&receipt.cid).unwrap();
    let err = bridge
        .retrieve(&receipt.cid, None, Vec::new(), false)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn vfs_read_through_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge
        .store(&hundred_row_table(), Some("events"), None, None)
        .unwrap();
    let vfs = VirtualFileSystem::new(Arc::clone(&bridge));

    // ls(/datasets) lists an entry for the cid
    let listed = vfs.ls("/datasets").unwrap();
    assert!(listed
        .iter()
        .any(|e| e.path == format!("/datasets/{}", receipt.cid)));

    // the sidecar is readable and parses as JSON describing the dataset
    let sidecar_bytes = vfs
        .cat_file(&format!("/metadata/{}.json", receipt.cid), None, None)
        .unwrap();
    let sidecar: serde_json::Value = serde_json::from_slice(&sidecar_bytes).unwrap();
    assert_eq!(sidecar["cid"].as_str(), Some(receipt.cid.as_str()));
    assert_eq!(sidecar["row_count"].as_u64(), Some(100));

    // opening query paths for write fails with invalid_argument
    let err = vfs.open("/queries/result.json", "w").unwrap_err();
    assert_eq!(err.kind(), stowage::ErrorKind::InvalidArgument);
}

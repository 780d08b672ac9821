//! End-to-end bridge and VFS behavior over a real filesystem.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use stowage_bridge::{
    BridgeOptions, ColumnarBridge, RecordingSink, ReplicationEvent, VirtualFileSystem,
};
use stowage_columnar::{CmpOp, Column, ColumnData, Filter, Scalar, Table};
use stowage_core::{CompressionCodec, Error};

fn sample_table() -> Table {
    Table::from_columns(vec![
        Column::new(
            "region",
            ColumnData::Utf8(vec![
                Some("eu".into()),
                Some("us".into()),
                Some("eu".into()),
                Some("ap".into()),
            ]),
        ),
        Column::new(
            "count",
            ColumnData::Int64(vec![Some(10), Some(20), Some(30), Some(40)]),
        ),
    ])
    .unwrap()
}

fn options(base: &Path) -> BridgeOptions {
    BridgeOptions {
        base_path: base.to_path_buf(),
        compression: CompressionCodec::Zstd,
        row_group_size: 64,
        max_partition_size: 64 * 1024 * 1024,
        cache_capacity: 16,
        enable_wal: false,
        enable_replication: false,
    }
}

fn open_bridge(base: &Path) -> ColumnarBridge {
    ColumnarBridge::open(options(base), None, None).unwrap()
}

#[test]
fn store_retrieve_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let table = sample_table();

    let receipt = bridge.store(&table, Some("events"), None, None).unwrap();
    assert_eq!(receipt.row_count, 4);
    assert_eq!(receipt.column_count, 2);
    assert!(!receipt.partitioned);
    assert!(receipt.size_bytes > 0);

    let back = bridge.retrieve(&receipt.cid, None, Vec::new(), true).unwrap();
    assert_eq!(back.table, table);
    assert_eq!(back.metadata.cid, receipt.cid);
}

#[test]
fn storing_twice_is_deterministic_and_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let metadata = BTreeMap::from([("k".to_string(), "v".to_string())]);

    let first = bridge
        .store(&sample_table(), Some("t"), Some(metadata.clone()), None)
        .unwrap();
    let sidecar_first = bridge.sidecar_bytes(&first.cid).unwrap();

    let second = bridge
        .store(&sample_table(), Some("t"), Some(metadata), None)
        .unwrap();
    assert_eq!(first.cid, second.cid);
    assert!(second.deduplicated);
    let sidecar_second = bridge.sidecar_bytes(&second.cid).unwrap();
    assert_eq!(sidecar_first, sidecar_second);
}

#[test]
fn different_metadata_is_a_different_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let a = bridge.store(&sample_table(), Some("t"), None, None).unwrap();
    let b = bridge
        .store(
            &sample_table(),
            Some("t"),
            Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            None,
        )
        .unwrap();
    assert_ne!(a.cid, b.cid);
}

#[test]
fn retrieve_with_projection_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();

    let result = bridge
        .retrieve(
            &receipt.cid,
            Some(vec!["count".to_string()]),
            vec![Filter::new("region", CmpOp::Eq, Scalar::Utf8("eu".into()))],
            true,
        )
        .unwrap();
    assert_eq!(result.table.column_count(), 1);
    assert_eq!(result.table.row_count(), 2);
}

#[test]
fn partitioned_store_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge
        .store(
            &sample_table(),
            Some("by_region"),
            None,
            Some(&["region".to_string()]),
        )
        .unwrap();
    assert!(receipt.partitioned);
    assert!(receipt.path.is_dir());

    let back = bridge.retrieve(&receipt.cid, None, Vec::new(), true).unwrap();
    assert_eq!(back.table.row_count(), 4);
    assert_eq!(back.table.column_count(), 2);
    assert!(back.metadata.partitioned());
}

#[test]
fn delete_then_retrieve_fails_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();

    bridge.delete(&receipt.cid).unwrap();
    let err = bridge
        .retrieve(&receipt.cid, None, Vec::new(), true)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    // double delete also reports not found
    assert!(matches!(
        bridge.delete(&receipt.cid).unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(bridge.list_datasets().unwrap().is_empty());
}

#[test]
fn index_rebuilds_from_sidecars_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cid = {
        let bridge = open_bridge(dir.path());
        bridge.store(&sample_table(), Some("t"), None, None).unwrap().cid
    };
    let bridge = open_bridge(dir.path());
    assert_eq!(bridge.known_cids(), vec![cid.clone()]);
    let back = bridge.retrieve(&cid, None, Vec::new(), false).unwrap();
    assert_eq!(back.table.row_count(), 4);
}

#[test]
fn query_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();
    let aliases = BTreeMap::from([("events".to_string(), receipt.cid)]);

    let result = bridge
        .query(
            "SELECT region, count FROM events WHERE count > 10 ORDER BY count DESC LIMIT 2",
            &aliases,
        )
        .unwrap();
    assert_eq!(result.row_count(), 2);
    assert_eq!(
        result.cell("count", 0),
        Some(stowage_columnar::table::Cell::Int64(40))
    );

    // writes through the query path are rejected
    let err = bridge.query("DELETE FROM events", &aliases).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn replication_sink_sees_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let bridge = ColumnarBridge::open(
        BridgeOptions {
            enable_replication: true,
            ..options(dir.path())
        },
        None,
        Some(sink.clone()),
    )
    .unwrap();

    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();
    bridge.delete(&receipt.cid).unwrap();
    assert_eq!(
        sink.events(),
        vec![
            ReplicationEvent::Stored {
                cid: receipt.cid.clone()
            },
            ReplicationEvent::Deleted { cid: receipt.cid },
        ]
    );
}

#[test]
fn content_references_track_locations_and_access() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();

    let fresh = bridge.content_reference(&receipt.cid).unwrap();
    assert_eq!(fresh.access_count, 0);
    assert!(fresh
        .backend_locations
        .contains_key(&stowage_core::Backend::Local));
    assert!(fresh.content_hash.is_some());

    bridge.retrieve(&receipt.cid, None, Vec::new(), true).unwrap();
    bridge.retrieve(&receipt.cid, None, Vec::new(), true).unwrap();
    let touched = bridge.content_reference(&receipt.cid).unwrap();
    assert_eq!(touched.access_count, 2);
    assert!(touched.last_accessed >= fresh.last_accessed);

    bridge.delete(&receipt.cid).unwrap();
    assert!(bridge.content_reference(&receipt.cid).is_none());
}

#[test]
fn storage_stats_track_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = open_bridge(dir.path());
    bridge.store(&sample_table(), Some("a"), None, None).unwrap();
    bridge
        .store(&sample_table(), Some("b"), None, Some(&["region".to_string()]))
        .unwrap();
    let stats = bridge.get_storage_stats().unwrap();
    assert_eq!(stats.dataset_count, 2);
    assert_eq!(stats.partitioned_count, 1);
    assert!(stats.total_size_bytes > 0);
}

// ============================================================================
// VFS facade
// ============================================================================

#[test]
fn vfs_read_through() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge.store(&sample_table(), Some("t"), None, None).unwrap();
    let vfs = VirtualFileSystem::new(bridge);

    // root namespace
    let root: Vec<String> = vfs.ls("/").unwrap().into_iter().map(|e| e.path).collect();
    assert_eq!(root, vec!["/datasets", "/metadata", "/queries"]);

    // dataset listed and readable
    let datasets = vfs.ls("/datasets").unwrap();
    assert!(datasets
        .iter()
        .any(|e| e.path == format!("/datasets/{}", receipt.cid)));
    let bytes = vfs
        .cat_file(&format!("/datasets/{}", receipt.cid), None, None)
        .unwrap();
    assert_eq!(bytes.len() as u64, receipt.size_bytes);

    // sidecar readable as JSON
    let sidecar = vfs
        .cat_file(&format!("/metadata/{}.json", receipt.cid), None, None)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&sidecar).unwrap();
    assert_eq!(parsed["cid"].as_str(), Some(receipt.cid.as_str()));

    assert!(vfs.exists(&format!("/datasets/{}", receipt.cid)));
    assert!(!vfs.exists("/datasets/bafynope"));
}

#[test]
fn vfs_range_reads_are_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();
    let vfs = VirtualFileSystem::new(bridge);
    let path = format!("/datasets/{}", receipt.cid);

    let full = vfs.cat_file(&path, None, None).unwrap();
    let head = vfs.cat_file(&path, Some(0), Some(4)).unwrap();
    assert_eq!(head, &full[..4]);
    // parquet magic
    assert_eq!(&head, b"PAR1");

    let beyond = vfs.cat_file(&path, Some(1_000_000), None).unwrap();
    assert!(beyond.is_empty());
    let clamped = vfs
        .cat_file(&path, Some(full.len() as u64 - 2), Some(10_000_000))
        .unwrap();
    assert_eq!(clamped.len(), 2);
}

#[test]
fn vfs_writes_fail_with_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    bridge.store(&sample_table(), None, None, None).unwrap();
    let vfs = VirtualFileSystem::new(bridge);

    for mode in ["w", "wb", "a", "r+"] {
        let err = vfs.open("/queries/whatever.json", mode).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "mode {mode}");
    }
}

#[test]
fn vfs_file_handle_read_and_seek() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();
    let vfs = VirtualFileSystem::new(bridge);

    let mut file = vfs
        .open(&format!("/datasets/{}", receipt.cid), "rb")
        .unwrap();
    assert_eq!(file.len(), receipt.size_bytes);
    let head = file.read(Some(4)).unwrap();
    assert_eq!(&head, b"PAR1");
    assert_eq!(file.tell(), 4);
    file.seek(0);
    let all = file.read(None).unwrap();
    assert_eq!(all.len() as u64, receipt.size_bytes);
    file.close();
    assert!(file.read(None).is_err());
}

#[test]
fn vfs_query_results_are_cached_and_listed() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge.store(&sample_table(), None, None, None).unwrap();
    let vfs = VirtualFileSystem::new(bridge);
    let aliases = BTreeMap::from([("t".to_string(), receipt.cid)]);

    let path = vfs
        .query_to_path("SELECT region FROM t WHERE count >= 30", &aliases)
        .unwrap();
    assert!(path.starts_with("/queries/"));
    assert!(vfs.exists(&path));

    let bytes = vfs.cat_file(&path, None, None).unwrap();
    let rows: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);

    let listed = vfs.ls("/queries").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, path);
}

#[test]
fn vfs_materializes_partitioned_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Arc::new(open_bridge(dir.path()));
    let receipt = bridge
        .store(&sample_table(), None, None, Some(&["region".to_string()]))
        .unwrap();
    let vfs = VirtualFileSystem::new(bridge);

    let bytes = vfs
        .cat_file(&format!("/datasets/{}", receipt.cid), None, None)
        .unwrap();
    // a valid single-file parquet serialization
    assert_eq!(&bytes[..4], b"PAR1");
    assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
}

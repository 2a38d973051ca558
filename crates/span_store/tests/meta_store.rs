//! Catalog durability and semantics.

use span_store::{DbEngine, Error, MetaStore, RangeMeta, StatusCode, StoreOptions};
use tempfile::TempDir;

fn sample_meta(id: u64) -> RangeMeta {
    RangeMeta {
        id,
        start_key: vec![0x10, id as u8],
        end_key: vec![0x10, id as u8 + 1],
        schema_id: 7,
        replicas: vec![1, 2, 3],
        version: 1,
    }
}

#[test]
fn node_id_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = MetaStore::open(dir.path(), false).unwrap();
        assert_eq!(store.node_id().unwrap(), 0);
        store.save_node_id(42).unwrap();
        assert_eq!(store.node_id().unwrap(), 42);
    }
    let store = MetaStore::open(dir.path(), false).unwrap();
    assert_eq!(store.node_id().unwrap(), 42);
}

#[test]
fn fresh_store_reports_node_id_zero() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();
    assert_eq!(store.node_id().unwrap(), 0);
}

#[test]
fn range_descriptors_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();

    let meta = sample_meta(12);
    store.add_range(&meta).unwrap();
    assert_eq!(store.range(12).unwrap(), meta);

    // Overwriting the same id is allowed.
    let mut updated = meta.clone();
    updated.version = 2;
    store.add_range(&updated).unwrap();
    assert_eq!(store.range(12).unwrap().version, 2);

    match store.range(99) {
        Err(err) => assert_eq!(err.code(), StatusCode::NotFound),
        Ok(_) => panic!("absent range resolved"),
    }
}

#[test]
fn batch_add_lands_every_descriptor() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();

    let metas: Vec<RangeMeta> = [5u64, 1, 9].iter().map(|id| sample_meta(*id)).collect();
    store.batch_add_range(&metas).unwrap();

    let ids: Vec<u64> = store.all_ranges().unwrap().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 5, 9]);
}

#[test]
fn del_range_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();

    store.add_range(&sample_meta(3)).unwrap();
    store.del_range(3).unwrap();
    assert!(matches!(store.range(3), Err(Error::NotFound)));
    // Deleting again stays ok.
    store.del_range(3).unwrap();
    store.del_range(77).unwrap();
}

#[test]
fn apply_index_round_trip_and_reset() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();

    assert_eq!(store.apply_index(8).unwrap(), 0);
    for index in [1u64, 5, 500] {
        store.save_apply_index(8, index).unwrap();
        assert_eq!(store.apply_index(8).unwrap(), index);
    }

    store.delete_apply_index(8).unwrap();
    assert_eq!(store.apply_index(8).unwrap(), 0);
    store.delete_apply_index(8).unwrap();
}

#[test]
fn apply_indices_are_independent_per_range() {
    let dir = TempDir::new().unwrap();
    let store = MetaStore::open(dir.path(), false).unwrap();

    store.save_apply_index(1, 10).unwrap();
    store.save_apply_index(2, 20).unwrap();
    assert_eq!(store.apply_index(1).unwrap(), 10);
    assert_eq!(store.apply_index(2).unwrap(), 20);
}

#[test]
fn descriptors_survive_reopen_with_sync_writes() {
    let dir = TempDir::new().unwrap();
    {
        let store = MetaStore::open(dir.path(), false).unwrap();
        store.batch_add_range(&[sample_meta(1), sample_meta(2)]).unwrap();
        store.save_apply_index(1, 99).unwrap();
    }
    let store = MetaStore::open(dir.path(), false).unwrap();
    assert_eq!(store.all_ranges().unwrap().len(), 2);
    assert_eq!(store.apply_index(1).unwrap(), 99);
}

#[test]
fn options_wire_both_store_directories() {
    let root = TempDir::new().unwrap();
    let opts = StoreOptions::new(root.path().join("data"), root.path().join("meta"));
    assert!(opts.write_sync);
    assert!(!opts.apply_index_sync);

    let data = DbEngine::open(&opts.data_dir, false).unwrap();
    let meta = MetaStore::open(&opts.meta_dir, false)
        .unwrap()
        .with_apply_sync(opts.apply_index_sync);

    data.put(b"\x10k", b"v", opts.write_sync).unwrap();
    meta.save_apply_index(1, 7).unwrap();
    assert_eq!(meta.apply_index(1).unwrap(), 7);
    assert_eq!(data.get(b"\x10k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn read_only_catalog_rejects_writes() {
    let dir = TempDir::new().unwrap();
    {
        let store = MetaStore::open(dir.path(), false).unwrap();
        store.save_node_id(7).unwrap();
    }
    let store = MetaStore::open(dir.path(), true).unwrap();
    assert_eq!(store.node_id().unwrap(), 7);
    assert!(matches!(store.save_node_id(8), Err(Error::Io { .. })));
    assert!(matches!(
        store.add_range(&sample_meta(1)),
        Err(Error::Io { .. })
    ));
}

//! Moving streams out of a legacy (shared) store into feed stores

mod common;

use common::*;
use refdata::prelude::*;
use std::sync::Barrier;
use std::thread;

const FEED: &str = "LEGACY_FEED";
const FEED_UUID: &str = "feed-uuid-legacy";

fn load_into(store: &LmdbRefDataStore, stream_id: StreamId, value: &str) {
    let def = stream_def(stream_id);
    store
        .do_with_loader_unless_complete(&def, 1_000, |loader| {
            let map = MapDefinition::new(def.clone(), "MAP");
            loader.put(&map, "k", &RefDataValue::string(value))?;
            loader.put_range(&map, 10..20, &RefDataValue::string(value))?;
            loader.complete_processing()
        })
        .unwrap();
}

/// Router over a directory holding a legacy store with `stream_ids`
fn legacy_harness(stream_ids: &[StreamId]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    {
        let legacy = LmdbRefDataStore::open(dir.path(), None, &test_config(dir.path())).unwrap();
        for &stream_id in stream_ids {
            load_into(&legacy, stream_id, &format!("legacy-{}", stream_id));
        }
    }

    let meta: Arc<FakeMetaService> = Arc::default();
    let feeds: Arc<FakeFeedDocService> = Arc::default();
    feeds.add_feed(FEED, FEED_UUID);
    for &stream_id in stream_ids {
        meta.add_stream(stream_id, FEED, 1_000);
    }
    Harness::in_dir(dir, meta, feeds)
}

#[test]
fn test_legacy_stream_migrates_exactly_once() {
    let harness = legacy_harness(&[42, 43]);
    let store = harness.store();
    assert!(store.legacy_store().is_some());
    assert!(store.is_migration_check_required());
    assert_eq!(store.migration_count(), 0);

    let map = map_def(42, "MAP");
    assert_eq!(
        store.get_value(&map, "k").unwrap(),
        Some(RefDataValue::string("legacy-42"))
    );
    assert_eq!(
        store.get_value(&map, "15").unwrap(),
        Some(RefDataValue::string("legacy-42"))
    );
    assert_eq!(store.migration_count(), 1);

    // Now in the feed store, gone from the legacy store
    let feed_store = store.get_effective_store(42).unwrap();
    assert_eq!(feed_store.feed_name(), Some(FEED));
    assert!(feed_store.exists_stream(42).unwrap());
    let legacy = store.legacy_store().unwrap();
    assert!(!legacy.exists_stream(42).unwrap());
    assert!(legacy.exists_stream(43).unwrap());
    drop(legacy);

    // Second access does not migrate again
    assert!(store.exists(&map).unwrap());
    assert_eq!(
        store.get_load_state(&stream_def(42)).unwrap(),
        Some(ProcessingState::Complete)
    );
    assert_eq!(store.migration_count(), 1);
}

#[test]
fn test_empty_legacy_store_is_removed() {
    let harness = legacy_harness(&[42, 43]);
    let store = harness.store();

    store.get_effective_store(42).unwrap();
    assert!(store.is_migration_check_required());
    store.get_effective_store(43).unwrap();

    assert_eq!(store.migration_count(), 2);
    assert!(store.legacy_store().is_none());
    assert!(!store.is_migration_check_required());
    assert!(!harness.dir.path().join("data.mdb").exists());

    assert_eq!(
        store.get_value(&map_def(43, "MAP"), "k").unwrap(),
        Some(RefDataValue::string("legacy-43"))
    );
}

#[test]
fn test_purge_can_empty_legacy_store() {
    let harness = legacy_harness(&[42]);
    let store = harness.store();

    // Removed from the legacy store in place, never migrated
    let summary = store.purge(42).unwrap();
    assert_eq!(summary.ref_streams_purged, 1);
    assert_eq!(store.migration_count(), 0);
    assert!(store.legacy_store().is_none());
    assert_eq!(store.get_load_state(&stream_def(42)).unwrap(), None);
}

#[test]
fn test_purge_reaches_legacy_stream_without_meta_record() {
    let harness = legacy_harness(&[42]);
    let store = harness.store();
    {
        let legacy = store.legacy_store().unwrap();
        load_into(&legacy, 99, "orphan");
    }

    let summary = store.purge(99).unwrap();
    assert_eq!(summary.ref_streams_purged, 1);
    let legacy = store.legacy_store().unwrap();
    assert!(!legacy.exists_stream(99).unwrap());
    assert!(legacy.exists_stream(42).unwrap());
    assert_eq!(store.migration_count(), 0);
}

#[test]
fn test_migration_survives_restart() {
    let harness = legacy_harness(&[42, 43]);
    harness.store().get_effective_store(42).unwrap();
    assert_eq!(harness.store().migration_count(), 1);

    let harness = harness.reopen();
    let store = harness.store();

    // The feed store is found on disk before any access
    let feed_stores = store.feed_name_to_store_map();
    assert_eq!(feed_stores.keys().collect::<Vec<_>>(), vec![FEED]);
    assert!(store.legacy_store().is_some());

    // Already resident: no second copy
    assert_eq!(
        store.get_value(&map_def(42, "MAP"), "k").unwrap(),
        Some(RefDataValue::string("legacy-42"))
    );
    assert_eq!(store.migration_count(), 0);

    store.get_effective_store(43).unwrap();
    assert_eq!(store.migration_count(), 1);
}

#[test]
fn test_unresolvable_stream_does_not_block_others() {
    let harness = legacy_harness(&[42, 43]);
    // 99 sits in the legacy store but has no meta record
    {
        let legacy = harness.store().legacy_store().unwrap();
        load_into(&legacy, 99, "orphan");
    }
    let store = harness.store();

    let err = store.get_value(&map_def(99, "MAP"), "k").unwrap_err();
    assert!(matches!(err, RefDataError::FeedResolution(_)));

    assert_eq!(
        store.get_value(&map_def(42, "MAP"), "k").unwrap(),
        Some(RefDataValue::string("legacy-42"))
    );
}

#[test]
fn test_concurrent_first_access_migrates_once() {
    let harness = legacy_harness(&[42, 43]);
    let store = harness.store().clone();
    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.get_value(&map_def(42, "MAP"), "k").unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.join().unwrap(),
            Some(RefDataValue::string("legacy-42"))
        );
    }
    assert_eq!(store.migration_count(), 1);
}

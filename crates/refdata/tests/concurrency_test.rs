//! Concurrency guarantees: one load per ref stream under contention and
//! one store per feed under concurrent first access

mod common;

use common::*;
use refdata::prelude::*;
use refdata::LoadOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

const FEED: &str = "CONTENDED_FEED";
const FEED_UUID: &str = "feed-uuid-contended";

#[test]
fn test_concurrent_loads_run_body_once() {
    let harness = Harness::new();
    harness.feeds.add_feed(FEED, FEED_UUID);
    harness.meta.add_stream(1, FEED, 1_000);

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let bodies = Arc::new(AtomicUsize::new(0));
    let store = harness.store().clone();

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let bodies = Arc::clone(&bodies);

            thread::spawn(move || {
                barrier.wait();
                let def = stream_def(1);
                store
                    .do_with_loader_unless_complete(&def, 1_000, |loader| {
                        bodies.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        let map = MapDefinition::new(def.clone(), "MAP");
                        for i in 0..100 {
                            loader.put(&map, &format!("key{}", i), &RefDataValue::string("v"))?;
                        }
                        loader.complete_processing()
                    })
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<LoadOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(bodies.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.iter().filter(|o| o.was_loaded()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == LoadOutcome::AlreadyComplete)
            .count(),
        num_threads - 1
    );
    assert_eq!(
        store.get_load_state(&stream_def(1)).unwrap(),
        Some(ProcessingState::Complete)
    );
    assert_eq!(store.key_value_entry_count().unwrap(), 100);
}

#[test]
fn test_repeat_load_is_a_no_op() {
    let harness = Harness::new();
    harness.feeds.add_feed(FEED, FEED_UUID);
    harness.meta.add_stream(1, FEED, 1_000);
    let store = harness.store();
    let def = stream_def(1);
    let map = map_def(1, "MAP");

    let first = store
        .do_with_loader_unless_complete(&def, 1_000, |loader| {
            loader.put(&map, "k", &RefDataValue::string("first"))?;
            loader.complete_processing()
        })
        .unwrap();
    assert!(first.was_loaded());

    let second = store
        .do_with_loader_unless_complete(&def, 1_000, |loader| {
            loader.put(&map, "k", &RefDataValue::string("second"))?;
            loader.complete_processing()
        })
        .unwrap();
    assert_eq!(second, LoadOutcome::AlreadyComplete);
    assert_eq!(
        store.get_value(&map, "k").unwrap(),
        Some(RefDataValue::string("first"))
    );
}

#[test]
fn test_concurrent_lookups_trigger_one_load() {
    let harness = Harness::new();
    harness.feeds.add_feed(FEED, FEED_UUID);
    harness.meta.add_stream(1, FEED, 1_000);
    let loader = Arc::new(
        FakeLoader::new(harness.store().clone(), harness.meta.clone())
            .with_load_delay(Duration::from_millis(50)),
    );
    loader.add_entries(1, vec![key_entry("MAP", "k", "v")]);

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let db = &harness.db;

    thread::scope(|scope| {
        for _ in 0..num_threads {
            let barrier = Arc::clone(&barrier);
            let loader = Arc::clone(&loader);
            scope.spawn(move || {
                // One orchestrator per thread, as each processing run has its own
                let reference_data = db.reference_data(loader);
                barrier.wait();
                let value = reference_data
                    .get_value(
                        &[reference(FEED, FEED_UUID)],
                        &LookupIdentifier::new("MAP", "k", 2_000),
                    )
                    .unwrap();
                assert_eq!(value, Some(RefDataValue::string("v")));
            });
        }
    });

    assert_eq!(loader.load_bodies(), 1);
}

#[test]
fn test_concurrent_first_access_creates_one_feed_store() {
    let harness = Harness::new();
    harness.feeds.add_feed(FEED, FEED_UUID);
    for stream_id in 0..16 {
        harness.meta.add_stream(stream_id, FEED, stream_id * 100);
    }

    let num_threads = 16;
    let barrier = Arc::new(Barrier::new(num_threads));
    let store = harness.store().clone();

    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.get_effective_store(i as StreamId).unwrap()
            })
        })
        .collect();

    let feed_stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for feed_store in &feed_stores {
        assert!(Arc::ptr_eq(feed_store, &feed_stores[0]));
    }

    let dirs: Vec<_> = std::fs::read_dir(harness.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].file_name().to_str(), Some("CONTENDED_FEED___feed-uuid-contended"));
}

#[test]
fn test_slow_feed_creation_does_not_block_other_feeds() {
    let harness = Harness::new();
    harness.feeds.add_feed("SLOW_FEED", "feed-uuid-slow");
    harness.feeds.add_feed(FEED, FEED_UUID);
    harness.feeds.with_lookup_delay("SLOW_FEED", Duration::from_secs(2));
    harness.meta.add_stream(1, "SLOW_FEED", 0);
    harness.meta.add_stream(2, FEED, 0);
    let store = harness.store().clone();

    let slow = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.get_effective_store(1).unwrap())
    };
    while harness.feeds.feed_uuid_calls.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    // Creation of SLOW_FEED's store is now in flight
    let start = std::time::Instant::now();
    let fast = store.get_effective_store(2).unwrap();
    assert!(store.feed_name_to_store_map().contains_key(FEED));
    assert!(start.elapsed() < Duration::from_secs(1));

    let slow = slow.join().unwrap();
    assert!(!Arc::ptr_eq(&slow, &fast));
    assert_eq!(store.feed_name_to_store_map().len(), 2);
}

#[test]
fn test_readers_do_not_see_partial_loads() {
    let harness = Harness::new();
    harness.feeds.add_feed(FEED, FEED_UUID);
    harness.meta.add_stream(1, FEED, 1_000);
    let store = harness.store().clone();
    let map = map_def(1, "MAP");
    let loading = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));

    let writer = {
        let store = Arc::clone(&store);
        let map = map.clone();
        let loading = Arc::clone(&loading);
        let checked = Arc::clone(&checked);
        thread::spawn(move || {
            store
                .do_with_loader_unless_complete(&stream_def(1), 1_000, |loader| {
                    loader.put(&map, "k", &RefDataValue::string("v"))?;
                    loading.wait();
                    checked.wait();
                    loader.complete_processing()
                })
                .unwrap()
        })
    };

    loading.wait();
    // Put but not committed
    assert_eq!(store.get_value(&map, "k").unwrap(), None);
    assert!(!store.exists(&map).unwrap());
    checked.wait();

    assert!(writer.join().unwrap().was_loaded());
    assert_eq!(
        store.get_value(&map, "k").unwrap(),
        Some(RefDataValue::string("v"))
    );
}

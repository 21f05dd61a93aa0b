//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use parking_lot::RwLock;
use refdata::prelude::*;
use refdata::LoadOutcome;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const PIPELINE_UUID: &str = "pipeline-uuid-1";
pub const PIPELINE_VERSION: &str = "7";
pub const STREAM_TYPE: &str = "Reference";

pub fn pipeline() -> DocRef {
    DocRef::new(PIPELINE_UUID, "Reference Loader")
}

pub fn reference(feed_name: &str, feed_uuid: &str) -> PipelineReference {
    PipelineReference::new(pipeline(), DocRef::new(feed_uuid, feed_name), STREAM_TYPE)
}

pub fn stream_def(stream_id: StreamId) -> RefStreamDefinition {
    RefStreamDefinition::new(PIPELINE_UUID, PIPELINE_VERSION, stream_id)
}

pub fn map_def(stream_id: StreamId, map_name: &str) -> MapDefinition {
    MapDefinition::new(stream_def(stream_id), map_name)
}

#[derive(Default)]
pub struct FakeMetaService {
    streams: RwLock<HashMap<StreamId, EffectiveMeta>>,
    pub effective_meta_calls: AtomicUsize,
}

impl FakeMetaService {
    pub fn add_stream(&self, stream_id: StreamId, feed_name: &str, effective_ms: i64) {
        self.streams.write().insert(
            stream_id,
            EffectiveMeta::new(stream_id, feed_name, STREAM_TYPE, effective_ms),
        );
    }

    pub fn effective_ms(&self, stream_id: StreamId) -> Option<i64> {
        self.streams.read().get(&stream_id).map(|m| m.effective_ms)
    }
}

impl MetaService for FakeMetaService {
    fn feed_name(&self, stream_id: StreamId) -> Result<Option<String>> {
        Ok(self.streams.read().get(&stream_id).map(|m| m.feed_name.clone()))
    }

    fn effective_meta(&self, feed_name: &str, stream_type: &str) -> Result<Vec<EffectiveMeta>> {
        self.effective_meta_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .streams
            .read()
            .values()
            .filter(|m| m.feed_name == feed_name && m.type_name == stream_type)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeFeedDocService {
    feeds: RwLock<HashMap<String, Vec<String>>>,
    lookup_delays: RwLock<HashMap<String, Duration>>,
    pub feed_uuid_calls: AtomicUsize,
}

impl FakeFeedDocService {
    pub fn add_feed(&self, feed_name: &str, feed_uuid: &str) {
        self.feeds
            .write()
            .entry(feed_name.to_string())
            .or_default()
            .push(feed_uuid.to_string());
    }

    /// Make uuid lookups of `feed_name` take `delay`
    pub fn with_lookup_delay(&self, feed_name: &str, delay: Duration) {
        self.lookup_delays.write().insert(feed_name.to_string(), delay);
    }
}

impl FeedDocService for FakeFeedDocService {
    fn feed_uuids(&self, feed_name: &str) -> Result<Vec<String>> {
        self.feed_uuid_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.lookup_delays.read().get(feed_name).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(self.feeds.read().get(feed_name).cloned().unwrap_or_default())
    }

    fn feed_name(&self, feed_uuid: &str) -> Result<Option<String>> {
        Ok(self
            .feeds
            .read()
            .iter()
            .find(|(_, uuids)| uuids.iter().any(|u| u == feed_uuid))
            .map(|(name, _)| name.clone()))
    }
}

#[derive(Debug, Clone)]
pub enum FakeEntry {
    Key(String, String, RefDataValue),
    Range(String, Range<i64>, RefDataValue),
}

pub fn key_entry(map: &str, key: &str, value: &str) -> FakeEntry {
    FakeEntry::Key(map.to_string(), key.to_string(), RefDataValue::string(value))
}

/// Loads canned entries per stream through the router's loader protocol
pub struct FakeLoader {
    store: Arc<DelegatingRefDataStore>,
    meta: Arc<FakeMetaService>,
    data: RwLock<HashMap<StreamId, Vec<FakeEntry>>>,
    load_delay: Duration,
    /// Calls to `load`
    pub load_calls: AtomicUsize,
    /// Executions of the load body
    pub load_bodies: AtomicUsize,
}

impl FakeLoader {
    pub fn new(store: Arc<DelegatingRefDataStore>, meta: Arc<FakeMetaService>) -> Self {
        Self {
            store,
            meta,
            data: RwLock::new(HashMap::new()),
            load_delay: Duration::ZERO,
            load_calls: AtomicUsize::new(0),
            load_bodies: AtomicUsize::new(0),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn add_entries(&self, stream_id: StreamId, entries: Vec<FakeEntry>) {
        self.data
            .write()
            .entry(stream_id)
            .or_default()
            .extend(entries);
    }

    pub fn load_bodies(&self) -> usize {
        self.load_bodies.load(Ordering::SeqCst)
    }
}

impl ReferenceDataLoader for FakeLoader {
    fn pipeline_version(&self, _pipeline: &DocRef) -> Result<String> {
        Ok(PIPELINE_VERSION.to_string())
    }

    fn load(&self, def: &RefStreamDefinition) -> Result<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let effective_ms = self.meta.effective_ms(def.stream_id).ok_or_else(|| {
            RefDataError::Load(format!("No meta for stream {}", def.stream_id))
        })?;
        let entries = self
            .data
            .read()
            .get(&def.stream_id)
            .cloned()
            .unwrap_or_default();

        let outcome = self
            .store
            .do_with_loader_unless_complete(def, effective_ms, |loader| {
                self.load_bodies.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(self.load_delay);
                for entry in &entries {
                    match entry {
                        FakeEntry::Key(map, key, value) => {
                            loader.put(&MapDefinition::new(def.clone(), map.as_str()), key, value)?
                        }
                        FakeEntry::Range(map, range, value) => loader.put_range(
                            &MapDefinition::new(def.clone(), map.as_str()),
                            range.clone(),
                            value,
                        )?,
                    }
                }
                loader.complete_processing()
            })?;
        if let LoadOutcome::Loaded(stats) = outcome {
            tracing::debug!("Loaded {} with {} puts", def, stats.total_puts());
        }
        Ok(())
    }
}

/// A router over a temp dir with fake collaborators
pub struct Harness {
    pub dir: TempDir,
    pub meta: Arc<FakeMetaService>,
    pub feeds: Arc<FakeFeedDocService>,
    pub db: RefDataDb,
    pub loader: Arc<FakeLoader>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, Arc::default(), Arc::default())
    }

    pub fn in_dir(dir: TempDir, meta: Arc<FakeMetaService>, feeds: Arc<FakeFeedDocService>) -> Self {
        let config = test_config(dir.path());
        let db = RefDataDb::open_with_config(config, meta.clone(), feeds.clone()).unwrap();
        let loader = Arc::new(FakeLoader::new(db.store().clone(), meta.clone()));
        Self {
            dir,
            meta,
            feeds,
            db,
            loader,
        }
    }

    /// Drop the router and open a new one over the same directory
    pub fn reopen(self) -> Self {
        let Harness {
            dir,
            meta,
            feeds,
            db,
            loader,
        } = self;
        drop(loader);
        drop(db);
        Self::in_dir(dir, meta, feeds)
    }

    pub fn store(&self) -> &Arc<DelegatingRefDataStore> {
        self.db.store()
    }

    pub fn reference_data(&self) -> ReferenceData {
        self.db.reference_data(self.loader.clone())
    }
}

pub fn test_config(dir: &std::path::Path) -> ReferenceDataConfig {
    ReferenceDataConfig::new(dir)
        .with_lmdb(LmdbConfig::default().with_max_store_size(64 * 1024 * 1024))
}

pub fn string_value(value: Option<RefDataValue>) -> Option<String> {
    value.and_then(|v| v.as_str().map(str::to_string))
}

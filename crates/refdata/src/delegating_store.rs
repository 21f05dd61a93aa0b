//! Store router
//!
//! Routes every single-stream operation to the LMDB store of the feed that
//! owns the stream, and fans aggregate operations out over all feed stores
//! plus the legacy store, if one is present.

use crate::effective_stream_cache::unshare_error;
use crate::feed_store_dir::{feed_store_dir_name, parse_feed_store_dir_name, sanitise_feed_name};
use dashmap::{DashMap, DashSet};
use moka::sync::Cache;
use parking_lot::RwLock;
use rayon::prelude::*;
use refdata_core::{
    error::{RefDataError, Result},
    lock_manager::LockManager,
    observe,
    traits::{FeedDocService, MetaService, RefDataStore},
    types::{
        LoadOutcome, MapDefinition, ProcessingInfoResponse, ProcessingState, PurgeSummary,
        RefDataValue, RefStoreEntry, RefStreamDefinition, StreamId, ValueType,
    },
    ReferenceDataConfig,
};
use refdata_lmdb::{LmdbRefDataLoader, LmdbRefDataStore, RefDataValueProxy, DATA_FILE_NAME};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LMDB_FILE_NAMES: [&str; 2] = [DATA_FILE_NAME, "lock.mdb"];

/// Reference data store partitioned by feed
///
/// Feed stores are created on first use, exactly once per feed, in a
/// directory named from the feed name and its feed doc uuid. A stream id
/// resolves to its feed through the meta service, cached for
/// `meta_id_to_store_cache.time_to_live_secs`.
///
/// When `local_dir` itself holds a (pre-partitioning) legacy store, the
/// first access to each stream id moves that stream's data into its feed
/// store. Migration checks stop for good once the legacy store is empty.
pub struct DelegatingRefDataStore {
    config: ReferenceDataConfig,
    meta_service: Arc<dyn MetaService>,
    feed_doc_service: Arc<dyn FeedDocService>,
    feed_name_to_store: DashMap<String, Arc<LmdbRefDataStore>>,
    feed_creation_locks: LockManager<String>,
    meta_id_to_store: Cache<StreamId, Arc<LmdbRefDataStore>>,
    legacy_store: RwLock<Option<Arc<LmdbRefDataStore>>>,
    migration_check_required: AtomicBool,
    migration_checked_ids: DashSet<StreamId>,
    migration_locks: LockManager<StreamId>,
    migration_count: AtomicU64,
}

impl DelegatingRefDataStore {
    /// Open the router over `config.local_dir`, opening the legacy store
    /// and every existing feed store found there
    pub fn open(
        config: ReferenceDataConfig,
        meta_service: Arc<dyn MetaService>,
        feed_doc_service: Arc<dyn FeedDocService>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.local_dir)?;

        let meta_id_to_store = Cache::builder()
            .max_capacity(config.meta_id_to_store_cache.max_entries)
            .time_to_live(config.meta_id_to_store_cache.time_to_live())
            .build();

        let legacy_store = if LmdbRefDataStore::exists_in(&config.local_dir) {
            tracing::info!(
                "Found legacy reference data store in {}",
                config.local_dir.display()
            );
            Some(Arc::new(LmdbRefDataStore::open(
                &config.local_dir,
                None,
                &config,
            )?))
        } else {
            None
        };
        let migration_check_required = legacy_store.is_some();

        let store = Self {
            meta_service,
            feed_doc_service,
            feed_name_to_store: DashMap::new(),
            meta_id_to_store,
            legacy_store: RwLock::new(legacy_store),
            migration_check_required: AtomicBool::new(migration_check_required),
            migration_checked_ids: DashSet::new(),
            migration_locks: LockManager::new(),
            feed_creation_locks: LockManager::new(),
            migration_count: AtomicU64::new(0),
            config,
        };

        store.discover_feed_stores()?;
        store.check_legacy_store_state()?;
        Ok(store)
    }

    /// Open every `<SANITISED_FEED>___<uuid>` directory whose uuid still
    /// names a feed doc
    fn discover_feed_stores(&self) -> Result<()> {
        for dir_entry in std::fs::read_dir(&self.config.local_dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name();
            let Some(dir_name) = dir_name.to_str() else {
                tracing::warn!("Ignoring non UTF-8 directory {:?}", dir_entry.path());
                continue;
            };
            let Some((sanitised, feed_uuid)) = parse_feed_store_dir_name(dir_name) else {
                tracing::warn!("Ignoring unrecognised directory {}", dir_name);
                continue;
            };
            if !LmdbRefDataStore::exists_in(dir_entry.path()) {
                tracing::warn!("Ignoring directory {} with no store in it", dir_name);
                continue;
            }

            let feed_name = match self.feed_doc_service.feed_name(feed_uuid) {
                Ok(Some(feed_name)) => feed_name,
                Ok(None) => {
                    tracing::warn!(
                        "Ignoring store {}, no feed doc with uuid {}",
                        dir_name,
                        feed_uuid
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Ignoring store {}, feed doc lookup failed: {}", dir_name, e);
                    continue;
                }
            };
            if sanitise_feed_name(&feed_name) != sanitised {
                tracing::warn!(
                    "Feed {} has been renamed to {}, keeping store {}",
                    sanitised,
                    feed_name,
                    dir_name
                );
            }

            let store =
                LmdbRefDataStore::open(dir_entry.path(), Some(feed_name.clone()), &self.config)?;
            self.feed_name_to_store.insert(feed_name, Arc::new(store));
        }

        tracing::info!(
            "Opened {} feed stores in {}",
            self.feed_name_to_store.len(),
            self.config.local_dir.display()
        );
        Ok(())
    }

    pub fn config(&self) -> &ReferenceDataConfig {
        &self.config
    }

    /// Store holding `stream_id`, migrating the stream out of the legacy
    /// store first if needed.
    ///
    /// Fails if the stream has no meta record or its feed cannot be
    /// resolved to exactly one feed doc.
    pub fn get_effective_store(&self, stream_id: StreamId) -> Result<Arc<LmdbRefDataStore>> {
        let store = self.resolve_store(stream_id)?;
        if self.migration_check_required.load(Ordering::Acquire) {
            self.migrate_if_required(stream_id, &store);
        }
        Ok(store)
    }

    /// Feed store owning `stream_id`, without any legacy migration
    fn resolve_store(&self, stream_id: StreamId) -> Result<Arc<LmdbRefDataStore>> {
        self.meta_id_to_store
            .try_get_with(stream_id, || {
                let feed_name = self.meta_service.feed_name(stream_id)?.ok_or_else(|| {
                    RefDataError::FeedResolution(format!("No meta record for stream {}", stream_id))
                })?;
                self.feed_store(&feed_name)
            })
            .map_err(unshare_error)
    }

    /// Store of `feed_name`, created on first use
    pub fn feed_store(&self, feed_name: &str) -> Result<Arc<LmdbRefDataStore>> {
        if let Some(store) = self.feed_name_to_store.get(feed_name) {
            return Ok(store.value().clone());
        }

        // Serialise creation per feed. The map's shard lock is only taken
        // for the insert, so other feeds are never held up by a slow feed
        // doc lookup or environment open.
        let feed_key = feed_name.to_string();
        let _guard = self.feed_creation_locks.lock(&feed_key);
        if let Some(store) = self.feed_name_to_store.get(feed_name) {
            return Ok(store.value().clone());
        }

        let feed_uuid = self.resolve_feed_uuid(feed_name)?;
        let path = self
            .config
            .local_dir
            .join(feed_store_dir_name(feed_name, &feed_uuid));
        let store = Arc::new(LmdbRefDataStore::open(
            &path,
            Some(feed_key.clone()),
            &self.config,
        )?);
        tracing::info!("Created store for feed {} in {}", feed_name, path.display());
        self.feed_name_to_store.insert(feed_key, store.clone());
        Ok(store)
    }

    fn resolve_feed_uuid(&self, feed_name: &str) -> Result<String> {
        let mut uuids = self.feed_doc_service.feed_uuids(feed_name)?;
        match uuids.len() {
            1 => Ok(uuids.remove(0)),
            0 => Err(RefDataError::FeedResolution(format!(
                "No feed doc found for feed {}",
                feed_name
            ))),
            n => Err(RefDataError::FeedResolution(format!(
                "Found {} feed docs for feed {}, expected exactly one",
                n, feed_name
            ))),
        }
    }

    /// Check `stream_id` against the legacy store once per process.
    /// Failures are logged and retried on the next access.
    fn migrate_if_required(&self, stream_id: StreamId, target: &Arc<LmdbRefDataStore>) {
        if self.migration_checked_ids.contains(&stream_id) {
            return;
        }
        let _guard = self.migration_locks.lock(&stream_id);
        if self.migration_checked_ids.contains(&stream_id) {
            return;
        }

        match self.migrate_stream(stream_id, target) {
            Ok(()) => {
                self.migration_checked_ids.insert(stream_id);
            }
            Err(e) => {
                observe::record_migration(false);
                tracing::error!(
                    "Failed to migrate stream {} from the legacy store: {}",
                    stream_id,
                    e
                );
            }
        }
    }

    fn migrate_stream(&self, stream_id: StreamId, target: &LmdbRefDataStore) -> Result<()> {
        let Some(legacy) = self.legacy_store.read().clone() else {
            return Ok(());
        };
        // Existence in the target covers migrations done before a restart
        if target.exists_stream(stream_id)? || !legacy.exists_stream(stream_id)? {
            return Ok(());
        }

        let copied = legacy.migrate_ref_streams(stream_id, target)?;
        self.migration_count.fetch_add(1, Ordering::Relaxed);
        observe::record_migration(true);
        tracing::info!(
            "Migrated stream {} ({} entries) from the legacy store to {}",
            stream_id,
            copied,
            target.path().display()
        );

        drop(legacy);
        self.check_legacy_store_state()
    }

    /// Drop the legacy store once it is empty and stop checking it
    fn check_legacy_store_state(&self) -> Result<()> {
        let legacy = self.legacy_store.read().clone();
        match legacy {
            Some(legacy) => {
                if !legacy.is_empty()? {
                    return Ok(());
                }
                self.migration_check_required.store(false, Ordering::Release);
                drop(legacy);
                if let Some(legacy) = self.legacy_store.write().take() {
                    tracing::info!("Legacy reference data store is empty, removing it");
                    Self::delete_legacy_store(legacy);
                }
            }
            None => self.migration_check_required.store(false, Ordering::Release),
        }
        Ok(())
    }

    fn delete_legacy_store(legacy: Arc<LmdbRefDataStore>) {
        let dir = legacy.path().to_path_buf();
        match Arc::into_inner(legacy) {
            Some(legacy) => {
                drop(legacy);
                for file_name in LMDB_FILE_NAMES {
                    remove_if_present(&dir.join(file_name));
                }
            }
            // A proxy or an in-flight migration still holds it
            None => tracing::info!(
                "Legacy store in {} is still in use, leaving its files in place",
                dir.display()
            ),
        }
    }

    /// Lazy handle on `key` in `map_definition`
    pub fn get_value_proxy(
        &self,
        map_definition: &MapDefinition,
        key: &str,
    ) -> Result<RefDataValueProxy> {
        let store = self.get_effective_store(map_definition.stream_id())?;
        Ok(store.get_value_proxy(map_definition, key))
    }

    pub fn legacy_store(&self) -> Option<Arc<LmdbRefDataStore>> {
        self.legacy_store.read().clone()
    }

    pub fn is_migration_check_required(&self) -> bool {
        self.migration_check_required.load(Ordering::Acquire)
    }

    /// Number of streams moved out of the legacy store by this process
    pub fn migration_count(&self) -> u64 {
        self.migration_count.load(Ordering::Relaxed)
    }

    pub fn feed_name_to_store_map(&self) -> BTreeMap<String, Arc<LmdbRefDataStore>> {
        self.feed_name_to_store
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Legacy store first, then feed stores ordered by feed name
    fn all_stores(&self) -> Vec<Arc<LmdbRefDataStore>> {
        let mut stores: Vec<_> = self.legacy_store().into_iter().collect();
        stores.extend(self.feed_name_to_store_map().into_values());
        stores
    }

    /// Diagnostics for one feed's store, or for the router as a whole
    pub fn system_info(&self, feed_name: Option<&str>) -> Result<Value> {
        if let Some(feed_name) = feed_name {
            let store = self
                .feed_name_to_store
                .get(feed_name)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    RefDataError::FeedResolution(format!("No store exists for feed {}", feed_name))
                })?;
            return store.system_info();
        }

        let feed_stores: BTreeMap<String, String> = self
            .feed_name_to_store_map()
            .into_iter()
            .map(|(feed, store)| (feed, store.path().display().to_string()))
            .collect();
        let legacy = match self.legacy_store() {
            Some(legacy) => legacy.system_info()?,
            None => Value::Null,
        };
        let config = serde_json::to_value(&self.config)
            .map_err(|e| RefDataError::Serialization(e.to_string()))?;

        Ok(json!({
            "local_dir": self.config.local_dir.display().to_string(),
            "total_size_on_disk": self.size_on_disk()?,
            "feed_store_count": feed_stores.len(),
            "feed_stores": feed_stores,
            "legacy_store": legacy,
            "migration_check_required": self.is_migration_check_required(),
            "migrated_stream_count": self.migration_count(),
            "config": config,
        }))
    }

    fn sum_over_stores<F>(&self, count: F) -> Result<usize>
    where
        F: Fn(&LmdbRefDataStore) -> Result<usize> + Sync,
    {
        let counts: Vec<usize> = self
            .all_stores()
            .par_iter()
            .map(|store| count(store.as_ref()))
            .collect::<Result<_>>()?;
        Ok(counts.into_iter().sum())
    }
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
    }
}

impl RefDataStore for DelegatingRefDataStore {
    type Loader<'a> = LmdbRefDataLoader<'a>;

    fn get_load_state(&self, def: &RefStreamDefinition) -> Result<Option<ProcessingState>> {
        self.get_effective_store(def.stream_id)?.get_load_state(def)
    }

    fn exists(&self, map_definition: &MapDefinition) -> Result<bool> {
        self.get_effective_store(map_definition.stream_id())?
            .exists(map_definition)
    }

    fn get_value(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<RefDataValue>> {
        self.get_effective_store(map_definition.stream_id())?
            .get_value(map_definition, key)
    }

    fn consume_value_bytes<F, R>(
        &self,
        map_definition: &MapDefinition,
        key: &str,
        consumer: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(ValueType, &[u8]) -> R,
    {
        self.get_effective_store(map_definition.stream_id())?
            .consume_value_bytes(map_definition, key, consumer)
    }

    fn get_map_names(&self, def: &RefStreamDefinition) -> Result<BTreeSet<String>> {
        self.get_effective_store(def.stream_id)?.get_map_names(def)
    }

    fn do_with_loader_unless_complete<F>(
        &self,
        def: &RefStreamDefinition,
        effective_time_ms: i64,
        work: F,
    ) -> Result<LoadOutcome>
    where
        F: FnOnce(&mut Self::Loader<'_>) -> Result<()>,
    {
        let store = self.get_effective_store(def.stream_id)?;
        store.do_with_loader_unless_complete(def, effective_time_ms, work)
    }

    fn list_filtered<P>(&self, limit: usize, predicate: P) -> Result<Vec<RefStoreEntry>>
    where
        P: Fn(&RefStoreEntry) -> bool + Sync,
    {
        let per_store: Vec<Vec<RefStoreEntry>> = self
            .all_stores()
            .par_iter()
            .map(|store| store.list_filtered(limit, &predicate))
            .collect::<Result<_>>()?;
        Ok(per_store.into_iter().flatten().take(limit).collect())
    }

    fn list_processing_info_filtered<P>(
        &self,
        limit: usize,
        predicate: P,
    ) -> Result<Vec<ProcessingInfoResponse>>
    where
        P: Fn(&ProcessingInfoResponse) -> bool + Sync,
    {
        let per_store: Vec<Vec<ProcessingInfoResponse>> = self
            .all_stores()
            .par_iter()
            .map(|store| store.list_processing_info_filtered(limit, &predicate))
            .collect::<Result<_>>()?;
        Ok(per_store.into_iter().flatten().take(limit).collect())
    }

    fn key_value_entry_count(&self) -> Result<usize> {
        self.sum_over_stores(|store| store.key_value_entry_count())
    }

    fn range_value_entry_count(&self) -> Result<usize> {
        self.sum_over_stores(|store| store.range_value_entry_count())
    }

    fn processing_info_entry_count(&self) -> Result<usize> {
        self.sum_over_stores(|store| store.processing_info_entry_count())
    }

    fn size_on_disk(&self) -> Result<u64> {
        let sizes: Vec<u64> = self
            .all_stores()
            .par_iter()
            .map(|store| store.size_on_disk())
            .collect::<Result<_>>()?;
        Ok(sizes.into_iter().sum())
    }

    fn purge_old_data(&self) -> Result<PurgeSummary> {
        self.purge_old_data_older_than(self.config.purge_age())
    }

    fn purge_old_data_older_than(&self, age: Duration) -> Result<PurgeSummary> {
        let mut summary = PurgeSummary::default();
        for store in self.all_stores() {
            summary = summary.merge(store.purge_old_data_older_than(age)?);
        }
        self.check_legacy_store_state()?;
        Ok(summary)
    }

    /// Purges the legacy copy first and never migrates, so a stream whose
    /// feed can no longer be resolved is still removed from the legacy store.
    fn purge(&self, stream_id: StreamId) -> Result<PurgeSummary> {
        let summary = {
            let _guard = self.migration_locks.lock(&stream_id);
            let mut summary = match self.legacy_store() {
                Some(legacy) => legacy.purge(stream_id)?,
                None => PurgeSummary::default(),
            };
            match self.resolve_store(stream_id) {
                Ok(store) => summary = summary.merge(store.purge(stream_id)?),
                Err(RefDataError::FeedResolution(msg)) => {
                    tracing::warn!("Stream {} has no feed store to purge: {}", stream_id, msg)
                }
                Err(e) => return Err(e),
            }
            summary
        };
        self.check_legacy_store_state()?;
        Ok(summary)
    }

    fn log_all_contents_with<C>(&self, mut consumer: C) -> Result<()>
    where
        C: FnMut(&str),
    {
        for store in self.all_stores() {
            store.log_all_contents_with(&mut consumer)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DelegatingRefDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingRefDataStore")
            .field("local_dir", &self.config.local_dir)
            .field("feed_stores", &self.feed_name_to_store.len())
            .field("has_legacy_store", &self.legacy_store.read().is_some())
            .field("migration_count", &self.migration_count())
            .finish()
    }
}

use crate::iter;
use crate::keys;
use crate::loader::LmdbRefDataLoader;
use crate::proxy::RefDataValueProxy;
use crate::read_pool::{LmdbReadPool, PooledLmdbReadTxn};
use lmdb::{
    Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction,
    WriteFlags,
};
use refdata_core::{
    config::SyncMode,
    error::{RefDataError, Result},
    lock_manager::LockManager,
    observe,
    traits::{RefDataLoader, RefDataStore},
    types::{
        LoadOutcome, MapDefinition, ProcessingInfoResponse, ProcessingState, PurgeSummary,
        RefDataProcessingInfo, RefDataValue, RefStoreEntry, RefStoreKey, RefStreamDefinition,
        StreamId, ValueType,
    },
    ReferenceDataConfig,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const KEY_VALUE_DB: &str = "key_value";
pub const RANGE_VALUE_DB: &str = "range_value";
pub const PROCESSING_INFO_DB: &str = "processing_info";

/// Data file present in every LMDB environment directory
pub const DATA_FILE_NAME: &str = "data.mdb";

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// LMDB-backed reference data store
///
/// One environment per feed (or one legacy environment shared by all
/// feeds) holding three databases:
/// - `key_value`: `(map, key) -> value`
/// - `range_value`: `(map, [from, to)) -> value`
/// - `processing_info`: `ref stream -> processing record`
///
/// Reads run in their own read transactions and never block the single
/// LMDB writer. Loads are serialised per ref stream definition through
/// `loader_locks`.
pub struct LmdbRefDataStore {
    pub(crate) env: Arc<Environment>,
    pub(crate) key_value_db: Database,
    pub(crate) range_value_db: Database,
    pub(crate) processing_info_db: Database,
    path: PathBuf,
    feed_name: Option<String>,
    pub(crate) config: ReferenceDataConfig,
    read_pool: LmdbReadPool,
    pub(crate) loader_locks: LockManager<RefStreamDefinition>,
    /// Last access times seen by readers but not yet written, by stream key
    pending_last_access: Mutex<HashMap<Vec<u8>, i64>>,
}

impl LmdbRefDataStore {
    /// Open (creating if needed) the store in `path`.
    ///
    /// `feed_name` is `None` for the legacy store that predates per-feed
    /// stores.
    pub fn open(
        path: impl AsRef<Path>,
        feed_name: Option<String>,
        config: &ReferenceDataConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let lmdb_config = &config.lmdb;
        let mut env_builder = Environment::new();
        env_builder.set_max_dbs(3);
        env_builder.set_map_size(lmdb_config.max_store_size);
        env_builder.set_max_readers(lmdb_config.max_readers);

        // Read transactions are not tied to a thread, so one thread may
        // hold several (e.g. a lookup while resolving a proxy)
        let mut flags = EnvironmentFlags::NO_TLS;
        match lmdb_config.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => {
                flags.insert(EnvironmentFlags::NO_META_SYNC);
            }
            SyncMode::NoSync => {
                flags.insert(EnvironmentFlags::NO_SYNC);
            }
        }
        if !lmdb_config.read_ahead_enabled {
            flags.insert(EnvironmentFlags::NO_READAHEAD);
        }
        env_builder.set_flags(flags);

        let env = env_builder
            .open(&path)
            .map_err(|e| RefDataError::Io(std::io::Error::other(e)))?;

        let key_value_db = env
            .create_db(Some(KEY_VALUE_DB), DatabaseFlags::empty())
            .map_err(|e| RefDataError::Transaction(e.to_string()))?;
        let range_value_db = env
            .create_db(Some(RANGE_VALUE_DB), DatabaseFlags::empty())
            .map_err(|e| RefDataError::Transaction(e.to_string()))?;
        let processing_info_db = env
            .create_db(Some(PROCESSING_INFO_DB), DatabaseFlags::empty())
            .map_err(|e| RefDataError::Transaction(e.to_string()))?;

        let env = Arc::new(env);
        let read_pool = LmdbReadPool::new(env.clone(), &lmdb_config.read_pool);

        tracing::info!(
            "Opened reference data store at {} for feed {}",
            path.display(),
            feed_name.as_deref().unwrap_or("<legacy>")
        );

        Ok(Self {
            env,
            key_value_db,
            range_value_db,
            processing_info_db,
            path,
            feed_name,
            config: config.clone(),
            read_pool,
            loader_locks: LockManager::new(),
            pending_last_access: Mutex::new(HashMap::new()),
        })
    }

    /// True if `dir` holds an LMDB environment
    pub fn exists_in(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(DATA_FILE_NAME).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owning feed, `None` for the legacy store
    pub fn feed_name(&self) -> Option<&str> {
        self.feed_name.as_deref()
    }

    pub fn config(&self) -> &ReferenceDataConfig {
        &self.config
    }

    pub fn read_pool(&self) -> &LmdbReadPool {
        &self.read_pool
    }

    pub(crate) fn read(&self) -> Result<PooledLmdbReadTxn<'_>> {
        self.read_pool.acquire_blocking()
    }

    pub(crate) fn write_txn(&self) -> Result<RwTransaction<'_>> {
        self.env
            .begin_rw_txn()
            .map_err(|e| RefDataError::Transaction(e.to_string()))
    }

    /// Map a write or commit failure, surfacing a full map as `StoreFull`
    pub(crate) fn map_write_error(&self, e: lmdb::Error) -> RefDataError {
        match e {
            lmdb::Error::MapFull => RefDataError::StoreFull {
                max_store_size: self.config.lmdb.max_store_size,
            },
            e => RefDataError::Transaction(e.to_string()),
        }
    }

    pub(crate) fn processing_info<T: Transaction>(
        &self,
        txn: &T,
        def_key: &[u8],
    ) -> Result<Option<RefDataProcessingInfo>> {
        match txn.get(self.processing_info_db, &def_key) {
            Ok(bytes) => RefDataProcessingInfo::from_bytes(bytes).map(Some),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(RefDataError::Transaction(e.to_string())),
        }
    }

    pub(crate) fn put_processing_info(
        &self,
        txn: &mut RwTransaction<'_>,
        def_key: &[u8],
        info: &RefDataProcessingInfo,
    ) -> Result<()> {
        txn.put(
            self.processing_info_db,
            &def_key,
            &info.to_bytes(),
            WriteFlags::empty(),
        )
        .map_err(|e| self.map_write_error(e))
    }

    /// Processing record of `def`, without touching its last access time.
    /// Includes access times not yet flushed to the store.
    pub fn get_processing_info(
        &self,
        def: &RefStreamDefinition,
    ) -> Result<Option<RefDataProcessingInfo>> {
        let def_key = keys::stream_def_key(def)?;
        let read = self.read()?;
        let info = self.processing_info(read.txn(), &def_key)?;
        Ok(info.map(|info| self.with_pending_last_access(&def_key, info)))
    }

    /// `info` with its last access time raised to any pending one
    pub(crate) fn with_pending_last_access(
        &self,
        def_key: &[u8],
        info: RefDataProcessingInfo,
    ) -> RefDataProcessingInfo {
        match self.pending_last_access.lock().get(def_key) {
            Some(&pending) if pending > info.last_access_time_ms => {
                info.with_last_access_time(pending)
            }
            _ => info,
        }
    }

    fn record_last_access(&self, def_key: &[u8], now: i64) {
        let mut pending = self.pending_last_access.lock();
        let entry = pending.entry(def_key.to_vec()).or_insert(now);
        *entry = (*entry).max(now);
    }

    /// Write all pending last access times into `txn`. Streams whose
    /// processing record has gone are dropped.
    fn write_pending_last_access(&self, txn: &mut RwTransaction<'_>) -> Result<usize> {
        let pending = std::mem::take(&mut *self.pending_last_access.lock());
        let mut written = 0;
        for (def_key, time_ms) in pending {
            if let Some(info) = self.processing_info(&*txn, &def_key)? {
                if time_ms > info.last_access_time_ms {
                    self.put_processing_info(txn, &def_key, &info.with_last_access_time(time_ms))?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Persist last access times recorded by `get_load_state`. Runs before
    /// every purge and when the store is dropped.
    pub fn flush_last_access(&self) -> Result<usize> {
        if self.pending_last_access.lock().is_empty() {
            return Ok(0);
        }
        let mut txn = self.write_txn()?;
        let written = self.write_pending_last_access(&mut txn)?;
        txn.commit().map_err(|e| self.map_write_error(e))?;
        tracing::trace!("Flushed {} last access times in {}", written, self.path.display());
        Ok(written)
    }

    /// Lazy handle on `key` in `map_definition`. No I/O happens until the
    /// handle is resolved.
    pub fn get_value_proxy(
        self: &Arc<Self>,
        map_definition: &MapDefinition,
        key: &str,
    ) -> RefDataValueProxy {
        RefDataValueProxy::new(self.clone(), map_definition.clone(), key)
    }

    /// True if anything of `stream_id` (any pipeline, any version) is held
    pub fn exists_stream(&self, stream_id: StreamId) -> Result<bool> {
        let prefix = keys::stream_id_prefix(stream_id);
        let read = self.read()?;
        let txn = read.txn();
        Ok(iter::any_with_prefix(txn, self.processing_info_db, &prefix)?
            || iter::any_with_prefix(txn, self.key_value_db, &prefix)?
            || iter::any_with_prefix(txn, self.range_value_db, &prefix)?)
    }

    /// True if no database holds any entry
    pub fn is_empty(&self) -> Result<bool> {
        let read = self.read()?;
        let txn = read.txn();
        for db in [
            self.processing_info_db,
            self.key_value_db,
            self.range_value_db,
        ] {
            if iter::any_with_prefix(txn, db, &[])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Find the stored bytes for `key`, trying exact keys then ranges
    fn find_value<'txn, T: Transaction>(
        &self,
        txn: &'txn T,
        map_definition: &MapDefinition,
        key: &str,
    ) -> Result<Option<&'txn [u8]>> {
        let kv_key = keys::key_value_key(map_definition, key)?;
        match txn.get(self.key_value_db, &kv_key) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(RefDataError::Transaction(e.to_string())),
        }

        match key.trim().parse::<i64>() {
            Ok(numeric_key) => self.find_range_value(txn, map_definition, numeric_key),
            Err(_) => Ok(None),
        }
    }

    /// Value of the range containing `key`. Ranges are assumed not to
    /// overlap, so only the range with the smallest upper bound above
    /// `key` can contain it.
    fn find_range_value<'txn, T: Transaction>(
        &self,
        txn: &'txn T,
        map_definition: &MapDefinition,
        key: i64,
    ) -> Result<Option<&'txn [u8]>> {
        let Some(seek) = keys::range_seek_key(map_definition, key)? else {
            return Ok(None);
        };
        let prefix = keys::map_prefix(map_definition)?;

        let mut found = None;
        iter::scan_from(txn, self.range_value_db, &seek, |range_key, value| {
            if range_key.starts_with(&prefix) {
                let range = keys::decode_range_suffix(range_key, prefix.len())?;
                if range.contains(&key) {
                    found = Some(value);
                }
            }
            Ok(false)
        })?;
        Ok(found)
    }

    fn with_value_bytes<R>(
        &self,
        map_definition: &MapDefinition,
        key: &str,
        f: impl FnOnce(&[u8]) -> Result<R>,
    ) -> Result<Option<R>> {
        let read = self.read()?;
        let found = match self.find_value(read.txn(), map_definition, key) {
            // A key too long to store cannot be present
            Err(RefDataError::KeyTooLong { .. }) => None,
            other => other?,
        };
        found.map(f).transpose()
    }

    pub(crate) fn map_names_in<T: Transaction>(
        &self,
        txn: &T,
        def: &RefStreamDefinition,
    ) -> Result<BTreeSet<String>> {
        let def_key = keys::stream_def_key(def)?;
        let mut names = BTreeSet::new();
        iter::scan_prefix(txn, self.key_value_db, &def_key, |key, _| {
            let (map_def, _) = keys::decode_key_value_key(key)?;
            names.insert(map_def.map_name);
            Ok(true)
        })?;
        iter::scan_prefix(txn, self.range_value_db, &def_key, |key, _| {
            let (map_def, _) = keys::decode_range_value_key(key)?;
            names.insert(map_def.map_name);
            Ok(true)
        })?;
        Ok(names)
    }

    fn decode_entry<T: Transaction>(
        &self,
        txn: &T,
        key: &[u8],
        value: &[u8],
        is_range: bool,
    ) -> Result<RefStoreEntry> {
        let (map_definition, key) = if is_range {
            let (map_def, range) = keys::decode_range_value_key(key)?;
            (map_def, RefStoreKey::Range(range))
        } else {
            let (map_def, key) = keys::decode_key_value_key(key)?;
            (map_def, RefStoreKey::Key(key))
        };
        let def_key = keys::stream_def_key(&map_definition.ref_stream_definition)?;
        Ok(RefStoreEntry {
            feed_name: self.feed_name.clone(),
            processing_info: self
                .processing_info(txn, &def_key)?
                .map(|info| self.with_pending_last_access(&def_key, info)),
            map_definition,
            key,
            value: RefDataValue::from_bytes(value)?,
        })
    }

    fn count(&self, db: Database) -> Result<usize> {
        let read = self.read()?;
        iter::count_entries(read.txn(), db)
    }
}

impl RefDataStore for LmdbRefDataStore {
    type Loader<'a> = LmdbRefDataLoader<'a>;

    /// Also re-stamps the stream's last access time once it is older than
    /// `last_access_refresh_secs`. The new time is held in memory until the
    /// next purge writes it, so this never waits on a writer.
    fn get_load_state(&self, def: &RefStreamDefinition) -> Result<Option<ProcessingState>> {
        let def_key = keys::stream_def_key(def)?;
        let info = {
            let read = self.read()?;
            self.processing_info(read.txn(), &def_key)?
        };
        let Some(info) = info else {
            return Ok(None);
        };
        let info = self.with_pending_last_access(&def_key, info);

        let now = now_ms();
        let refresh_ms = (self.config.last_access_refresh_secs as i64).saturating_mul(1000);
        if info.state == ProcessingState::Complete
            && now.saturating_sub(info.last_access_time_ms) > refresh_ms
        {
            tracing::trace!("Refreshing last access time of {}", def);
            self.record_last_access(&def_key, now);
        }
        Ok(Some(info.state))
    }

    fn exists(&self, map_definition: &MapDefinition) -> Result<bool> {
        let prefix = match keys::map_prefix(map_definition) {
            // A map name too long to store cannot have entries
            Err(RefDataError::KeyTooLong { .. }) => return Ok(false),
            other => other?,
        };
        let read = self.read()?;
        let txn = read.txn();
        Ok(iter::any_with_prefix(txn, self.key_value_db, &prefix)?
            || iter::any_with_prefix(txn, self.range_value_db, &prefix)?)
    }

    fn get_value(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<RefDataValue>> {
        self.with_value_bytes(map_definition, key, RefDataValue::from_bytes)
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
        self.with_value_bytes(map_definition, key, |bytes| {
            let (value_type, payload) = RefDataValue::split_envelope(bytes)?;
            Ok(consumer(value_type, payload))
        })
    }

    fn get_map_names(&self, def: &RefStreamDefinition) -> Result<BTreeSet<String>> {
        let read = self.read()?;
        self.map_names_in(read.txn(), def)
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
        let start = Instant::now();
        let _guard = self.loader_locks.lock(def);

        if self.get_processing_info(def)?.map(|info| info.state) == Some(ProcessingState::Complete)
        {
            tracing::debug!("{} is already loaded, skipping", def);
            observe::record_load(start.elapsed(), "skipped");
            return Ok(LoadOutcome::AlreadyComplete);
        }

        tracing::debug!("Loading {} into {}", def, self.path.display());
        let mut loader = LmdbRefDataLoader::begin(self, def.clone(), effective_time_ms)?;
        let result = work(&mut loader);

        match result {
            Ok(()) if loader.is_complete() => {
                let stats = loader.stats();
                tracing::info!(
                    "Loaded {} with {} entries in {:?}",
                    def,
                    stats.total_puts(),
                    start.elapsed()
                );
                observe::record_load(start.elapsed(), "loaded");
                Ok(LoadOutcome::Loaded(stats))
            }
            Ok(()) => {
                loader.abort();
                observe::record_load(start.elapsed(), "fail");
                Err(RefDataError::Load(format!(
                    "Load of {} returned without completing processing",
                    def
                )))
            }
            Err(e) => {
                loader.abort();
                tracing::warn!("Load of {} failed: {}", def, e);
                observe::record_load(start.elapsed(), "fail");
                Err(e)
            }
        }
    }

    fn list_filtered<P>(&self, limit: usize, predicate: P) -> Result<Vec<RefStoreEntry>>
    where
        P: Fn(&RefStoreEntry) -> bool + Sync,
    {
        let mut entries = Vec::new();
        if limit == 0 {
            return Ok(entries);
        }
        let read = self.read()?;
        let txn = read.txn();

        for (db, is_range) in [(self.key_value_db, false), (self.range_value_db, true)] {
            iter::scan_from(txn, db, &[], |key, value| {
                let entry = self.decode_entry(txn, key, value, is_range)?;
                if predicate(&entry) {
                    entries.push(entry);
                }
                Ok(entries.len() < limit)
            })?;
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    fn list_processing_info_filtered<P>(
        &self,
        limit: usize,
        predicate: P,
    ) -> Result<Vec<ProcessingInfoResponse>>
    where
        P: Fn(&ProcessingInfoResponse) -> bool + Sync,
    {
        let mut responses = Vec::new();
        if limit == 0 {
            return Ok(responses);
        }
        let read = self.read()?;
        let txn = read.txn();

        iter::scan_from(txn, self.processing_info_db, &[], |key, value| {
            let (def, _) = keys::decode_stream_def(key)?;
            let response = ProcessingInfoResponse {
                feed_name: self.feed_name.clone(),
                processing_info: self
                    .with_pending_last_access(key, RefDataProcessingInfo::from_bytes(value)?),
                map_names: self.map_names_in(txn, &def)?.into_iter().collect(),
                ref_stream_definition: def,
            };
            if predicate(&response) {
                responses.push(response);
            }
            Ok(responses.len() < limit)
        })?;
        Ok(responses)
    }

    fn key_value_entry_count(&self) -> Result<usize> {
        self.count(self.key_value_db)
    }

    fn range_value_entry_count(&self) -> Result<usize> {
        self.count(self.range_value_db)
    }

    fn processing_info_entry_count(&self) -> Result<usize> {
        self.count(self.processing_info_db)
    }

    fn size_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    fn purge_old_data(&self) -> Result<PurgeSummary> {
        self.purge_older_than(self.config.purge_age())
    }

    fn purge_old_data_older_than(&self, age: Duration) -> Result<PurgeSummary> {
        self.purge_older_than(age)
    }

    fn purge(&self, stream_id: StreamId) -> Result<PurgeSummary> {
        self.purge_stream_id(stream_id)
    }

    fn log_all_contents_with<C>(&self, consumer: C) -> Result<()>
    where
        C: FnMut(&str),
    {
        self.dump_contents(consumer)
    }
}

impl std::fmt::Debug for LmdbRefDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbRefDataStore")
            .field("path", &self.path)
            .field("feed_name", &self.feed_name)
            .finish()
    }
}

impl Drop for LmdbRefDataStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush_last_access() {
            tracing::warn!(
                "Failed to write last access times in {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

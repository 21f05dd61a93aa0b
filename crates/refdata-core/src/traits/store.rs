use crate::error::Result;
use crate::types::{
    LoadOutcome, MapDefinition, ProcessingInfoResponse, ProcessingState, PurgeSummary,
    RefDataValue, RefStoreEntry, RefStreamDefinition, StreamId, ValueType,
};
use std::collections::BTreeSet;
use std::ops::Range;
use std::time::Duration;

/// Write session for one ref stream
///
/// Obtained only through [`RefDataStore::do_with_loader_unless_complete`].
/// Puts are upserts: the last value written for a key wins, so a failed
/// load can simply be re-run.
///
/// Note: Not required to be Send, as LMDB write transactions are thread-affine
pub trait RefDataLoader {
    /// The stream this session is loading
    fn ref_stream_definition(&self) -> &RefStreamDefinition;

    /// Write `key -> value` into `map_definition`
    fn put(&mut self, map_definition: &MapDefinition, key: &str, value: &RefDataValue)
        -> Result<()>;

    /// Write `[range.start, range.end) -> value` into `map_definition`
    fn put_range(
        &mut self,
        map_definition: &MapDefinition,
        range: Range<i64>,
        value: &RefDataValue,
    ) -> Result<()>;

    /// Commit everything written and mark the stream `COMPLETE`
    fn complete_processing(&mut self) -> Result<()>;

    /// Whether `complete_processing` has succeeded
    fn is_complete(&self) -> bool;
}

/// Reference data store: feed partitioned key and range values plus per
/// stream processing state
///
/// Implemented by a single physical store and by the router that fans out
/// over many of them. Absent data is never an error: lookups return `None`
/// or `false`.
pub trait RefDataStore: Send + Sync {
    type Loader<'a>: RefDataLoader
    where
        Self: 'a;

    /// Current state of `def`, `None` if it has never been loaded
    fn get_load_state(&self, def: &RefStreamDefinition) -> Result<Option<ProcessingState>>;

    /// True if any key or range entry exists for the map
    fn exists(&self, map_definition: &MapDefinition) -> Result<bool>;

    /// Look up `key`, falling back to range entries when it parses as an
    /// integer
    fn get_value(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<RefDataValue>>;

    /// Run `consumer` against the stored bytes without copying them out of
    /// the read transaction
    fn consume_value_bytes<F, R>(
        &self,
        map_definition: &MapDefinition,
        key: &str,
        consumer: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(ValueType, &[u8]) -> R;

    /// Names of every map held by `def`
    fn get_map_names(&self, def: &RefStreamDefinition) -> Result<BTreeSet<String>>;

    /// Load `def` unless it is already `COMPLETE`.
    ///
    /// At most one loader per stream definition is active at a time. A
    /// caller arriving while another loads the same definition waits, then
    /// observes `COMPLETE` and returns [`LoadOutcome::AlreadyComplete`]
    /// without running `work`. `work` must call
    /// [`RefDataLoader::complete_processing`]; returning without doing so is
    /// a load failure.
    fn do_with_loader_unless_complete<F>(
        &self,
        def: &RefStreamDefinition,
        effective_time_ms: i64,
        work: F,
    ) -> Result<LoadOutcome>
    where
        F: FnOnce(&mut Self::Loader<'_>) -> Result<()>;

    /// Up to `limit` key and range entries
    fn list(&self, limit: usize) -> Result<Vec<RefStoreEntry>> {
        self.list_filtered(limit, |_| true)
    }

    fn list_filtered<P>(&self, limit: usize, predicate: P) -> Result<Vec<RefStoreEntry>>
    where
        P: Fn(&RefStoreEntry) -> bool + Sync;

    /// Up to `limit` processing records
    fn list_processing_info(&self, limit: usize) -> Result<Vec<ProcessingInfoResponse>> {
        self.list_processing_info_filtered(limit, |_| true)
    }

    fn list_processing_info_filtered<P>(
        &self,
        limit: usize,
        predicate: P,
    ) -> Result<Vec<ProcessingInfoResponse>>
    where
        P: Fn(&ProcessingInfoResponse) -> bool + Sync;

    fn key_value_entry_count(&self) -> Result<usize>;

    fn range_value_entry_count(&self) -> Result<usize>;

    fn processing_info_entry_count(&self) -> Result<usize>;

    /// Bytes used on disk
    fn size_on_disk(&self) -> Result<u64>;

    /// Purge with the configured default age
    fn purge_old_data(&self) -> Result<PurgeSummary>;

    /// Purge every stream not accessed within `age`
    fn purge_old_data_older_than(&self, age: Duration) -> Result<PurgeSummary>;

    /// Purge every stream definition with this stream id
    fn purge(&self, stream_id: StreamId) -> Result<PurgeSummary>;

    /// Dump every entry at debug level
    fn log_all_contents(&self) -> Result<()> {
        self.log_all_contents_with(|line| tracing::debug!("{}", line))
    }

    /// Hand every entry, one line each, to `consumer`
    fn log_all_contents_with<C>(&self, consumer: C) -> Result<()>
    where
        C: FnMut(&str);
}

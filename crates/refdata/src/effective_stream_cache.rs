//! Effective stream cache
//!
//! Caches, per feed and loader pipeline, the ordered set of effective
//! streams so that "which version applies at time T" is a floor query on
//! an in-memory set rather than a meta service call per lookup.

use moka::sync::Cache;
use refdata_core::{
    error::{RefDataError, Result},
    observe,
    traits::MetaService,
    types::{EffectiveMeta, PipelineReference},
    CacheConfig,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Cache key: the feed, the loader pipeline and the stream type queried
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectiveStreamKey {
    pub feed_name: String,
    pub pipeline_uuid: String,
    pub stream_type: String,
}

impl EffectiveStreamKey {
    pub fn new(
        feed_name: impl Into<String>,
        pipeline_uuid: impl Into<String>,
        stream_type: impl Into<String>,
    ) -> Self {
        Self {
            feed_name: feed_name.into(),
            pipeline_uuid: pipeline_uuid.into(),
            stream_type: stream_type.into(),
        }
    }

    pub fn for_reference(reference: &PipelineReference) -> Self {
        Self::new(
            reference.feed.name.as_str(),
            reference.pipeline.uuid.as_str(),
            reference.stream_type.as_str(),
        )
    }
}

pub type EffectiveStreams = Arc<BTreeSet<EffectiveMeta>>;

/// Loading cache of effective stream sets
///
/// Concurrent misses for the same key block behind a single meta service
/// call. Failed loads are not cached.
pub struct EffectiveStreamCache {
    cache: Cache<EffectiveStreamKey, EffectiveStreams>,
    meta_service: Arc<dyn MetaService>,
}

impl EffectiveStreamCache {
    pub fn new(meta_service: Arc<dyn MetaService>, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.time_to_live())
            .build();
        Self {
            cache,
            meta_service,
        }
    }

    /// Effective streams for `key`, loading them on a miss
    pub fn get(&self, key: &EffectiveStreamKey) -> Result<EffectiveStreams> {
        let mut loaded = false;
        let result = self.cache.try_get_with(key.clone(), || {
            loaded = true;
            tracing::debug!(
                "Loading effective streams for feed {} type {}",
                key.feed_name,
                key.stream_type
            );
            self.meta_service
                .effective_meta(&key.feed_name, &key.stream_type)
                .map(|metas| Arc::new(metas.into_iter().collect::<BTreeSet<_>>()))
        });
        observe::record_cache_lookup(!loaded);
        result.map_err(unshare_error)
    }

    /// The stream effective at `time_ms`: the greatest effective time not
    /// after it, highest stream id on ties. `None` if every stream starts
    /// later.
    pub fn floor(streams: &BTreeSet<EffectiveMeta>, time_ms: i64) -> Option<&EffectiveMeta> {
        match time_ms.checked_add(1) {
            // Sorts after every stream effective at or before `time_ms`
            Some(after) => {
                let probe = EffectiveMeta::new(i64::MIN, String::new(), String::new(), after);
                streams.range(..probe).next_back()
            }
            None => streams.iter().next_back(),
        }
    }

    /// Look up and floor-select in one step
    pub fn effective_stream(
        &self,
        reference: &PipelineReference,
        time_ms: i64,
    ) -> Result<Option<EffectiveMeta>> {
        let streams = self.get(&EffectiveStreamKey::for_reference(reference))?;
        Ok(Self::floor(&streams, time_ms).cloned())
    }

    pub fn invalidate(&self, key: &EffectiveStreamKey) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

/// Loading caches share one error between every waiter
pub(crate) fn unshare_error(e: Arc<RefDataError>) -> RefDataError {
    match Arc::try_unwrap(e) {
        Ok(e) => e,
        Err(shared) => match &*shared {
            RefDataError::FeedResolution(msg) => RefDataError::FeedResolution(msg.clone()),
            RefDataError::Config(msg) => RefDataError::Config(msg.clone()),
            RefDataError::Transaction(msg) => RefDataError::Transaction(msg.clone()),
            RefDataError::InvalidState(msg) => RefDataError::InvalidState(msg.clone()),
            other => RefDataError::Other(anyhow::anyhow!("{}", other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::types::StreamId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct CountingMeta {
        calls: AtomicUsize,
    }

    impl MetaService for CountingMeta {
        fn feed_name(&self, _stream_id: StreamId) -> Result<Option<String>> {
            Ok(None)
        }

        fn effective_meta(&self, feed_name: &str, stream_type: &str) -> Result<Vec<EffectiveMeta>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if feed_name == "BROKEN" {
                return Err(RefDataError::Other(anyhow::anyhow!("meta store down")));
            }
            Ok(vec![
                EffectiveMeta::new(1, feed_name, stream_type, 100),
                EffectiveMeta::new(3, feed_name, stream_type, 200),
                EffectiveMeta::new(2, feed_name, stream_type, 200),
                EffectiveMeta::new(4, feed_name, stream_type, 300),
            ])
        }
    }

    fn cache() -> (Arc<CountingMeta>, EffectiveStreamCache) {
        let meta = Arc::new(CountingMeta {
            calls: AtomicUsize::new(0),
        });
        let cache = EffectiveStreamCache::new(meta.clone(), &CacheConfig::new(100, 600));
        (meta, cache)
    }

    #[test]
    fn test_floor_selection() {
        let (_meta, cache) = cache();
        let streams = cache
            .get(&EffectiveStreamKey::new("FEED", "pipe", "Reference"))
            .unwrap();

        let floor = |t| EffectiveStreamCache::floor(&streams, t).map(|m| m.id);
        assert_eq!(floor(99), None);
        assert_eq!(floor(100), Some(1));
        assert_eq!(floor(199), Some(1));
        // Tie on effective time goes to the highest stream id
        assert_eq!(floor(200), Some(3));
        assert_eq!(floor(299), Some(3));
        assert_eq!(floor(i64::MAX), Some(4));
        assert_eq!(EffectiveStreamCache::floor(&BTreeSet::new(), 0), None);
    }

    #[test]
    fn test_concurrent_misses_load_once() {
        let (meta, cache) = cache();
        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get(&EffectiveStreamKey::new("FEED", "pipe", "Reference"))
                        .unwrap()
                        .len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
        assert_eq!(meta.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_failed_loads_are_not_cached() {
        let (meta, cache) = cache();
        let key = EffectiveStreamKey::new("BROKEN", "pipe", "Reference");
        assert!(cache.get(&key).is_err());
        assert!(cache.get(&key).is_err());
        assert_eq!(meta.calls.load(Ordering::SeqCst), 2);
    }
}

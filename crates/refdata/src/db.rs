//! Unified reference data interface
//!
//! Bundles the feed-partitioned store and the effective stream cache, the
//! two pieces shared by every lookup in the process.

use crate::{DelegatingRefDataStore, EffectiveStreamCache, ReferenceData};
use refdata_core::{
    error::Result,
    traits::{FeedDocService, MetaService, ReferenceDataLoader},
    ReferenceDataConfig,
};
use std::path::Path;
use std::sync::Arc;

/// Process-wide reference data
pub struct RefDataDb {
    store: Arc<DelegatingRefDataStore>,
    effective_stream_cache: Arc<EffectiveStreamCache>,
}

impl RefDataDb {
    /// Open with default configuration in `local_dir`
    pub fn open<P: AsRef<Path>>(
        local_dir: P,
        meta_service: Arc<dyn MetaService>,
        feed_doc_service: Arc<dyn FeedDocService>,
    ) -> Result<Self> {
        let config = ReferenceDataConfig::new(local_dir.as_ref());
        Self::open_with_config(config, meta_service, feed_doc_service)
    }

    pub fn open_with_config(
        config: ReferenceDataConfig,
        meta_service: Arc<dyn MetaService>,
        feed_doc_service: Arc<dyn FeedDocService>,
    ) -> Result<Self> {
        let effective_stream_cache = Arc::new(EffectiveStreamCache::new(
            meta_service.clone(),
            &config.effective_stream_cache,
        ));
        let store = Arc::new(DelegatingRefDataStore::open(
            config,
            meta_service,
            feed_doc_service,
        )?);

        Ok(Self {
            store,
            effective_stream_cache,
        })
    }

    pub fn store(&self) -> &Arc<DelegatingRefDataStore> {
        &self.store
    }

    pub fn effective_stream_cache(&self) -> &Arc<EffectiveStreamCache> {
        &self.effective_stream_cache
    }

    pub fn config(&self) -> &ReferenceDataConfig {
        self.store.config()
    }

    /// A lookup orchestrator for one processing run
    pub fn reference_data(&self, loader: Arc<dyn ReferenceDataLoader>) -> ReferenceData {
        ReferenceData::new(
            self.store.clone(),
            self.effective_stream_cache.clone(),
            loader,
        )
    }
}

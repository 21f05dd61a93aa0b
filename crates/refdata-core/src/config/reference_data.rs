use super::lmdb::LmdbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sizing of a time-bounded loading cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub time_to_live_secs: u64,
}

impl CacheConfig {
    pub const fn new(max_entries: u64, time_to_live_secs: u64) -> Self {
        Self {
            max_entries,
            time_to_live_secs,
        }
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }
}

/// Configuration for the reference data store and lookup stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDataConfig {
    /// Parent directory of the legacy store and of every per-feed store
    pub local_dir: PathBuf,

    #[serde(default)]
    pub lmdb: LmdbConfig,

    /// Commit the load transaction every N puts. 0 commits only on completion.
    #[serde(default)]
    pub max_puts_before_commit: usize,

    /// Age used by `purge_old_data()` when none is given. Default: 30 days
    #[serde(default = "default_purge_age_secs")]
    pub purge_age_secs: u64,

    /// Maximum deletions per purge or migration write transaction
    #[serde(default = "default_purge_batch_size")]
    pub purge_batch_size: usize,

    /// Minimum age before a read re-stamps a stream's last access time
    #[serde(default = "default_last_access_refresh_secs")]
    pub last_access_refresh_secs: u64,

    #[serde(default = "default_effective_stream_cache")]
    pub effective_stream_cache: CacheConfig,

    #[serde(default = "default_meta_id_to_store_cache")]
    pub meta_id_to_store_cache: CacheConfig,
}

fn default_purge_age_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_purge_batch_size() -> usize {
    1000
}

fn default_last_access_refresh_secs() -> u64 {
    60 * 60
}

fn default_effective_stream_cache() -> CacheConfig {
    CacheConfig::new(1000, 10 * 60)
}

fn default_meta_id_to_store_cache() -> CacheConfig {
    CacheConfig::new(1000, 60 * 60)
}

impl ReferenceDataConfig {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
            lmdb: LmdbConfig::default(),
            max_puts_before_commit: 0,
            purge_age_secs: default_purge_age_secs(),
            purge_batch_size: default_purge_batch_size(),
            last_access_refresh_secs: default_last_access_refresh_secs(),
            effective_stream_cache: default_effective_stream_cache(),
            meta_id_to_store_cache: default_meta_id_to_store_cache(),
        }
    }

    pub fn with_lmdb(mut self, lmdb: LmdbConfig) -> Self {
        self.lmdb = lmdb;
        self
    }

    pub fn with_max_puts_before_commit(mut self, max_puts: usize) -> Self {
        self.max_puts_before_commit = max_puts;
        self
    }

    pub fn with_purge_age(mut self, age: Duration) -> Self {
        self.purge_age_secs = age.as_secs();
        self
    }

    pub fn with_purge_batch_size(mut self, batch_size: usize) -> Self {
        self.purge_batch_size = batch_size.max(1);
        self
    }

    pub fn with_last_access_refresh(mut self, refresh: Duration) -> Self {
        self.last_access_refresh_secs = refresh.as_secs();
        self
    }

    pub fn with_effective_stream_cache(mut self, cache: CacheConfig) -> Self {
        self.effective_stream_cache = cache;
        self
    }

    pub fn with_meta_id_to_store_cache(mut self, cache: CacheConfig) -> Self {
        self.meta_id_to_store_cache = cache;
        self
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.purge_age_secs)
    }
}

use serde::{Deserialize, Serialize};

/// Configuration for read transaction pooling
///
/// When enabled, bounds the number of concurrent read transactions a single
/// store opens. Readers beyond the bound wait for a permit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPoolConfig {
    /// Whether pooling is enabled (default: false, opt-in)
    #[serde(default)]
    pub enabled: bool,

    /// Number of concurrent read transaction slots (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Timeout in milliseconds when acquiring a read slot (default: 5000)
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for ReadPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl ReadPoolConfig {
    /// Create a new enabled read pool configuration
    pub fn enabled(pool_size: usize) -> Self {
        Self {
            enabled: true,
            pool_size,
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Calls `fsync()` on every commit.
    Full,

    /// Skips syncing the LMDB meta-page on each commit (default).
    ///
    /// Data pages are still synced. An OS crash may lose the last
    /// transaction but the environment stays consistent.
    #[default]
    NoMetaSync,

    /// Disables `fsync()` entirely.
    ///
    /// **WARNING**: a power failure can lose recent loads or corrupt the
    /// environment. Only use this for reproducible or test workloads.
    NoSync,
}

/// Settings applied to every LMDB environment (legacy and per-feed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmdbConfig {
    /// LMDB map size per environment, in bytes. Default: 10GB
    #[serde(default = "default_max_store_size")]
    pub max_store_size: usize,

    /// Default: 126
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    #[serde(default)]
    pub sync_mode: SyncMode,

    /// When false the environment is opened with `NO_READAHEAD`
    #[serde(default = "default_true")]
    pub read_ahead_enabled: bool,

    #[serde(default)]
    pub read_pool: ReadPoolConfig,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            max_store_size: default_max_store_size(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
            read_ahead_enabled: default_true(),
            read_pool: ReadPoolConfig::default(),
        }
    }
}

impl LmdbConfig {
    pub fn with_max_store_size(mut self, max_store_size: usize) -> Self {
        self.max_store_size = max_store_size;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_read_ahead(mut self, enabled: bool) -> Self {
        self.read_ahead_enabled = enabled;
        self
    }

    /// Enable read pooling with the specified pool size
    pub fn with_read_pool_size(mut self, pool_size: usize) -> Self {
        self.read_pool = ReadPoolConfig::enabled(pool_size);
        self
    }
}

fn default_max_store_size() -> usize {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_max_readers() -> u32 {
    126
}

fn default_true() -> bool {
    true
}

//! LMDB Read Transaction Pool
//!
//! Bounds how many read transactions a store has open at once. LMDB itself
//! allows up to `max_readers`; the pool keeps lookups from many processing
//! threads from exhausting those slots.

use lmdb::{Environment, RoTransaction};
use refdata_core::{
    error::{RefDataError, Result},
    ReadPoolConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

/// A read-only transaction holding a pool permit while it lives
pub struct PooledLmdbReadTxn<'a> {
    txn: RoTransaction<'a>,
    _permit: Option<SemaphorePermit<'a>>,
}

impl<'a> PooledLmdbReadTxn<'a> {
    pub fn txn(&self) -> &RoTransaction<'a> {
        &self.txn
    }
}

/// LMDB Read Transaction Pool
///
/// # Example
///
/// ```ignore
/// let pool = LmdbReadPool::new(env.clone(), ReadPoolConfig::enabled(4));
/// let read = pool.acquire_blocking()?;
/// let bytes = read.txn().get(db, &key);
/// // Transaction and permit are released when `read` is dropped
/// ```
pub struct LmdbReadPool {
    env: Arc<Environment>,
    semaphore: Semaphore,
    acquire_timeout: Duration,
    enabled: bool,
}

impl LmdbReadPool {
    pub fn new(env: Arc<Environment>, config: &ReadPoolConfig) -> Self {
        let pool_size = if config.enabled { config.pool_size.max(1) } else { 1 };
        Self {
            env,
            semaphore: Semaphore::new(pool_size),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            enabled: config.enabled,
        }
    }

    fn begin<'a>(&'a self, permit: Option<SemaphorePermit<'a>>) -> Result<PooledLmdbReadTxn<'a>> {
        let txn = self
            .env
            .begin_ro_txn()
            .map_err(|e| RefDataError::Transaction(e.to_string()))?;
        Ok(PooledLmdbReadTxn {
            txn,
            _permit: permit,
        })
    }

    /// Try to open a read transaction without waiting
    ///
    /// Returns `None` if no slot is immediately available.
    pub fn try_acquire(&self) -> Result<Option<PooledLmdbReadTxn<'_>>> {
        if !self.enabled {
            return self.begin(None).map(Some);
        }
        match self.semaphore.try_acquire() {
            Ok(permit) => self.begin(Some(permit)).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Open a read transaction, blocking the current thread
    ///
    /// Waits with exponential backoff (1ms, 2ms, 4ms, ... capped at 32ms)
    /// up to the configured `acquire_timeout`. Without pooling the
    /// transaction is opened immediately.
    pub fn acquire_blocking(&self) -> Result<PooledLmdbReadTxn<'_>> {
        if !self.enabled {
            return self.begin(None);
        }

        let deadline = Instant::now() + self.acquire_timeout;
        let mut backoff_ms = 1u64;
        const MAX_BACKOFF_MS: u64 = 32;

        let permit = loop {
            match self.semaphore.try_acquire() {
                Ok(permit) => break permit,
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(RefDataError::Transaction(format!(
                            "LMDB read pool acquire timeout after {:?}",
                            self.acquire_timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        };

        self.begin(Some(permit))
    }

    /// Number of free slots, `None` when pooling is disabled
    pub fn available_permits(&self) -> Option<usize> {
        self.enabled.then(|| self.semaphore.available_permits())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

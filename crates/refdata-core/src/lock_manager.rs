//! Keyed lock registry
//!
//! Hands out one exclusive lock per key. Entries are held weakly so a key's
//! lock disappears once no thread holds or waits on it, keeping the
//! registry bounded by the number of keys currently in contention.

use crate::observe;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Dead entries are swept once the registry grows past this many keys
const PRUNE_THRESHOLD: usize = 64;

/// Per-key exclusive lock registry
///
/// Different keys never block each other. Locks for the same key are
/// granted one at a time in the order parking_lot decides. There is no
/// acquisition timeout: a waiter is released only when the holder drops
/// its guard.
///
/// # Example
///
/// ```ignore
/// let locks = LockManager::new();
/// let _guard = locks.lock(&stream_definition);
/// // at most one thread is here for this stream definition
/// ```
pub struct LockManager<K> {
    locks: Mutex<HashMap<K, Weak<Mutex<()>>>>,
}

/// Guard holding the lock for one key, released on drop
pub struct KeyedLockGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl<K> Default for LockManager<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LockManager<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Block until the lock for `key` is held by the caller
    pub fn lock(&self, key: &K) -> KeyedLockGuard {
        let mutex = self.mutex_for(key);
        let start = Instant::now();
        let guard = mutex.lock_arc();
        observe::record_lock_wait(start.elapsed());
        KeyedLockGuard { _guard: guard }
    }

    /// Take the lock for `key` only if nobody else holds it
    pub fn try_lock(&self, key: &K) -> Option<KeyedLockGuard> {
        self.mutex_for(key)
            .try_lock_arc()
            .map(|guard| KeyedLockGuard { _guard: guard })
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        let mutex = Arc::new(Mutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&mutex));
        mutex
    }

    /// Number of keys with a live lock
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

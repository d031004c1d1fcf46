//! Per-key async mutexes.
//!
//! Used to serialize work on one feed URL, and reconciliation against one
//! (subscriber, subscription) ledger, without a global lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created mutexes, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Wait for and take the lock for `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.slot(key).await.lock_owned().await
    }

    /// Take the lock for `key` if nobody holds it.
    #[cfg(test)]
    pub async fn try_lock(&self, key: &K) -> Option<OwnedMutexGuard<()>> {
        self.slot(key).await.try_lock_owned().ok()
    }

    /// Drop the slot for `key` when nobody holds or waits on it.
    pub async fn forget(&self, key: &K) {
        let mut locks = self.locks.lock().await;
        if let Some(slot) = locks.get(key) {
            if Arc::strong_count(slot) == 1 {
                locks.remove(key);
            }
        }
    }

    /// Number of live slots.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether no slots exist.
    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

//! Local Tier Module
//!
//! The in-process (L1) tier: a bounded HashMap with LRU eviction and
//! per-entry absolute expiry.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, CacheValue, LruTracker};
use crate::error::{CacheError, Result};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    evictions: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    fn purge_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

// == Local Tier ==
/// Bounded in-process cache tier.
///
/// All state sits behind one mutex; no operation awaits while holding it.
#[derive(Debug)]
pub struct LocalTier {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LocalTier {
    /// Creates a tier holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CacheError::Configuration(
                "local tier capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        })
    }

    // == Get ==
    /// Returns the live value for `key`.
    ///
    /// An expired entry counts as absent and is removed on the way out.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(),
        };
        if expired {
            inner.remove(key);
            debug!(key = %key, "local entry expired on read");
            return None;
        }

        inner.lru.touch(key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    // == Set ==
    /// Inserts or overwrites `key`, expiring `ttl` from now.
    ///
    /// When a new key arrives at capacity, expired entries are dropped first;
    /// only if none were expired is the least recently used entry evicted.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Duration) {
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            let purged = inner.purge_expired(current_timestamp_ms());
            if purged == 0 {
                if let Some(evicted) = inner.lru.evict_oldest() {
                    inner.entries.remove(&evicted);
                    inner.evictions += 1;
                    debug!(key = %evicted, "local entry evicted at capacity");
                }
            }
        }

        inner.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        inner.lru.touch(key);
    }

    // == Delete ==
    /// Removes `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
    }

    // == Purge Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired(current_timestamp_ms())
    }

    /// Number of physically present entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped to make room since construction.
    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }
}

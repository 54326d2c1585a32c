//! Cache Entry Module
//!
//! Defines the structure for individual local-tier entries with absolute expiry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::CacheValue;

// == Cache Entry ==
/// A single local-tier entry: the value plus its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: CacheValue,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that expires `ttl` from now.
    pub fn new(value: CacheValue, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: current_timestamp_ms().saturating_add(saturating_millis(ttl)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

// == Utility Functions ==
/// `ttl` in whole milliseconds, saturating at `u64::MAX`.
pub fn saturating_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

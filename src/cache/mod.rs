//! Cache Module
//!
//! Two-tier caching: a bounded in-process tier with TTL expiry and LRU
//! eviction, an optional shared Redis tier, and per-key stampede protection.

mod engine;
mod entry;
mod guard;
pub mod keys;
mod local;
mod lru;
mod memo;
mod remote;
mod stats;
mod ttl;


// Re-export public types
pub use engine::{CacheEngine, TierScope};
pub use entry::CacheEntry;
pub use guard::StampedeGuard;
pub use keys::{canonical_parts, generate_key};
pub use local::LocalTier;
pub use lru::LruTracker;
pub use memo::Memoized;
pub use remote::{MemoryStore, RedisStore, RemoteStore, RemoteTier};
pub use stats::{
    hit_rate, CacheStatistics, LocalTierReport, RemoteTierReport, StatisticsReport, TotalReport,
};
pub use ttl::{TtlPolicy, DEFAULT_TTL};

/// Any value the cache can hold: null, booleans, numbers, strings, arrays
/// and string-keyed maps, nested arbitrarily.
pub type CacheValue = serde_json::Value;

//! Tiered Cache - a two-tier cache engine
//!
//! A bounded in-process tier with TTL expiry and LRU eviction sits in front
//! of an optional shared Redis tier. Lookups fall through local then remote,
//! remote hits are promoted, remote failures degrade to misses, and
//! concurrent misses on one key compute once.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{CacheEngine, CacheValue, Memoized, TierScope, TtlPolicy};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;

//! Cache Statistics Module
//!
//! Lock-free counters for both tiers and the nested report exported to
//! metrics consumers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Statistics ==
/// Engine-wide counters, safe for concurrent increment.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1(&self, hit: bool) {
        let counter = if hit { &self.l1_hits } else { &self.l1_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2(&self, hit: bool) {
        let counter = if hit { &self.l2_hits } else { &self.l2_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Builds the exported report. Tier sizes and availability come from the
    /// tiers themselves, not from counters.
    pub fn report(
        &self,
        size: usize,
        max_size: usize,
        evictions: u64,
        l2_available: bool,
    ) -> StatisticsReport {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_misses = self.l1_misses.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l2_misses = self.l2_misses.load(Ordering::Relaxed);

        StatisticsReport {
            l1: LocalTierReport {
                hits: l1_hits,
                misses: l1_misses,
                hit_rate: hit_rate(l1_hits, l1_misses),
                size,
                max_size,
                evictions,
            },
            l2: RemoteTierReport {
                available: l2_available,
                hits: l2_hits,
                misses: l2_misses,
                hit_rate: hit_rate(l2_hits, l2_misses),
            },
            total: TotalReport {
                sets: self.sets.load(Ordering::Relaxed),
                deletes: self.deletes.load(Ordering::Relaxed),
            },
        }
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 if no requests have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// `{l1:{..}, l2:{..}, total:{..}}` as consumed by the metrics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub l1: LocalTierReport,
    pub l2: RemoteTierReport,
    pub total: TotalReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalTierReport {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    /// Entries dropped to make room
    pub evictions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteTierReport {
    pub available: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalReport {
    pub sets: u64,
    pub deletes: u64,
}

//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Lock-free counters shared by every request touching a cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    populated: AtomicU64,
    aborted: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    /// A response was served from a valid buffer.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Miss ==
    /// A response was served from the source.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Evictions ==
    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// An entry finished populating.
    pub fn record_populated(&self) {
        self.populated.fetch_add(1, Ordering::Relaxed);
    }

    /// A population attempt was abandoned.
    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Copies the counters together with the cache's current load.
    pub fn snapshot(&self, items: usize, bytes: i64, limits: StatsLimits) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            populated: self.populated.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            items,
            bytes,
            max_items: limits.max_items,
            max_item_bytes: limits.max_item_bytes,
            max_total_bytes: limits.max_total_bytes,
        }
    }
}

/// Configured bounds reported alongside a snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsLimits {
    pub max_items: usize,
    pub max_item_bytes: i64,
    pub max_total_bytes: i64,
}

// == Stats Snapshot ==
/// Point-in-time copy of a cache's counters and load.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Responses served from a buffer
    pub hits: u64,
    /// Responses served from the source
    pub misses: u64,
    /// Nodes removed by eviction sweeps
    pub evictions: u64,
    /// Entries that became valid
    pub populated: u64,
    /// Population attempts that were abandoned
    pub aborted: u64,
    /// Current number of keys
    pub items: usize,
    /// Bytes currently reserved by buffers
    pub bytes: i64,
    pub max_items: usize,
    pub max_item_bytes: i64,
    pub max_total_bytes: i64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: StatsLimits = StatsLimits {
        max_items: 10,
        max_item_bytes: 100,
        max_total_bytes: 1000,
    };

    #[test]
    fn test_stats_new() {
        let snap = CacheStats::new().snapshot(0, 0, LIMITS);
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.evictions, 0);
        assert_eq!(snap.items, 0);
        assert_eq!(snap.max_items, 10);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let snap = CacheStats::new().snapshot(0, 0, LIMITS);
        assert_eq!(snap.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.snapshot(1, 0, LIMITS).hit_rate(), 0.75);
    }

    #[test]
    fn test_record_evictions_and_population() {
        let stats = CacheStats::new();
        stats.record_evictions(3);
        stats.record_evictions(2);
        stats.record_populated();
        stats.record_aborted();
        let snap = stats.snapshot(4, 512, LIMITS);
        assert_eq!(snap.evictions, 5);
        assert_eq!(snap.populated, 1);
        assert_eq!(snap.aborted, 1);
        assert_eq!(snap.bytes, 512);
    }
}

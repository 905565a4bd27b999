//! Request counters and derived hit-rate for a cache facade.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time cache statistics, shared by both facades.
///
/// Hit rate is derived, not stored, and updates are eventually consistent:
/// `stats()` is an observation, not a transactional readout.
#[derive(Debug, Default)]
pub struct Stats {
    total_requests: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

/// A snapshot of [`Stats`] plus tier sizes, returned by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total number of requests observed.
    pub total_requests: u64,
    /// Number of requests served as a hit.
    pub hits: u64,
    /// Number of LRU evictions performed.
    pub evictions: u64,
    /// Current number of entries held in the memory tier.
    pub memory_entries: usize,
    /// Current number of entries held on disk.
    pub disk_entries: usize,
    /// Current total size in bytes of all disk entries.
    pub disk_bytes: u64,
}

impl StatsSnapshot {
    /// Hits divided by total requests, or `0.0` if there have been none.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

impl Stats {
    /// Record the start of a new request.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an LRU eviction.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` LRU evictions at once.
    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    /// Build a snapshot, combining the atomic counters with the caller's
    /// current tier sizes.
    pub fn snapshot(
        &self,
        memory_entries: usize,
        disk_entries: usize,
        disk_bytes: u64,
    ) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            memory_entries,
            disk_entries,
            disk_bytes,
        }
    }

    /// Reset every counter to zero (used by `clear()`).
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

//! Lock-free cache and scan metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-cache counters using atomics (no locks on the lookup path).
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lookups served from a fresh cache entry.
    pub hits: AtomicU64,
    /// Lookups not answered from a cached entry. For the LRU cache each
    /// one started a store fetch; for the full-table cache the key was absent.
    pub misses: AtomicU64,
    /// Lookups that joined a fetch already in flight for the same key.
    pub coalesced: AtomicU64,
    /// Successful store round trips.
    pub store_queries: AtomicU64,
    /// Entries evicted to stay within capacity.
    pub evictions: AtomicU64,
    /// Full-table snapshots published after the initial load.
    pub reloads: AtomicU64,
    /// Full-table reloads that failed and kept the previous snapshot.
    pub reload_failures: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_query(&self) {
        self.store_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, n: u64) {
        if n > 0 {
            self.evictions.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reload(&self, ok: bool) {
        if ok {
            self.reloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reload_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of the current counters.
    ///
    /// `retries` comes from the cache's store fetcher.
    #[must_use]
    pub fn snapshot(&self, retries: u64) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            store_queries: self.store_queries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            retries,
        }
    }
}

/// Point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    /// Fresh hits.
    pub hits: u64,
    /// Misses that started a fetch.
    pub misses: u64,
    /// Lookups that joined an in-flight fetch.
    pub coalesced: u64,
    /// Successful store round trips.
    pub store_queries: u64,
    /// Evicted entries.
    pub evictions: u64,
    /// Published reloads.
    pub reloads: u64,
    /// Failed reloads.
    pub reload_failures: u64,
    /// Retried store attempts.
    pub retries: u64,
}

impl CacheMetricsSnapshot {
    /// Fraction of lookups answered without waiting on the store.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Per-scan counters.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    /// Batches emitted.
    pub batches: AtomicU64,
    /// Rows emitted.
    pub rows: AtomicU64,
    /// Checkpoints taken.
    pub checkpoints: AtomicU64,
}

impl ScanMetrics {
    pub(crate) fn record_batch(&self, rows: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self, retries: u64) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            retries,
        }
    }
}

/// Point-in-time snapshot of scan metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanMetricsSnapshot {
    /// Batches emitted.
    pub batches: u64,
    /// Rows emitted.
    pub rows: u64,
    /// Checkpoints taken.
    pub checkpoints: u64,
    /// Retried store attempts.
    pub retries: u64,
}

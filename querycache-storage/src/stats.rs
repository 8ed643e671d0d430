//! Resolution statistics for one `QueryCache`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    /// Requests served entirely from cache.
    pub hits: u64,
    /// Requests that needed a reduced fetch.
    pub partial_hits: u64,
    /// Requests that ran the original query.
    pub misses: u64,
    /// Requests whose record kind is never cached.
    pub bypasses: u64,
    /// Backend or record store failures that were treated as absent.
    pub backend_errors: u64,
    /// Write-backs that stored at least one entry.
    pub primes: u64,
    /// Generation bumps.
    pub invalidations: u64,
    /// Bumps that reset the counter to zero.
    pub overflow_resets: u64,
}

impl QueryCacheStats {
    /// Fraction of resolved requests (bypasses excluded) that were full hits.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.partial_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    backend_errors: AtomicU64,
    primes: AtomicU64,
    invalidations: AtomicU64,
    overflow_resets: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn prime(&self) {
        self.primes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidation(&self, overflowed: bool) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if overflowed {
            self.overflow_resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            partial_hits: self.partial_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            primes: self.primes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            overflow_resets: self.overflow_resets.load(Ordering::Relaxed),
        }
    }
}

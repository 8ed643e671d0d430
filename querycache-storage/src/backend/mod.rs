//! Interfaces consumed by the cache layer, plus reference backends.
//!
//! The cache layer never decides how entries are persisted or how records are
//! fetched. It talks to four collaborators:
//!
//! - [`CacheBackend`]: namespaced key/value entries with TTL
//! - [`GenerationCounter`]: the atomic per-domain counter
//! - [`RecordStore`]: batch get/set of records by id
//! - [`QuerySource`]: the source of truth, queried on a miss

pub(crate) mod entry;
pub mod lmdb;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use querycache_core::{CacheableRecord, Namespace, QueryCacheResult, QueryRequest, RecordId};
use serde::{de::DeserializeOwned, Serialize};

pub use lmdb::{LmdbCacheBackend, LmdbCacheError};
pub use memory::{InMemoryCacheBackend, InMemoryRecordStore};

/// Cache backend for ID-list and found-count entries.
///
/// Implementations must be thread-safe. Keys are only meaningful together
/// with their namespace: the same key under two namespaces names two
/// unrelated entries.
///
/// # TTL
///
/// A zero `ttl` means the entry never expires.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value. Expired entries read as `None`.
    async fn get<T>(&self, key: &str, namespace: &Namespace) -> QueryCacheResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static;

    /// Unconditionally write a value.
    async fn set<T>(
        &self,
        key: &str,
        value: &T,
        namespace: &Namespace,
        ttl: Duration,
    ) -> QueryCacheResult<()>
    where
        T: Serialize + Sync;

    /// Write a value only if the key holds no live value.
    ///
    /// Returns true if the value was written.
    async fn add<T>(
        &self,
        key: &str,
        value: &T,
        namespace: &Namespace,
        ttl: Duration,
    ) -> QueryCacheResult<bool>
    where
        T: Serialize + Sync;

    /// Get backend statistics.
    async fn stats(&self) -> QueryCacheResult<BackendStats>;
}

/// Atomic counter holding one generation per cache domain.
///
/// `increment` must be atomic across processes sharing the backend. No
/// client-side locking is layered on top of it.
#[async_trait]
pub trait GenerationCounter: Send + Sync {
    /// Read the counter, `None` if it has never been initialized.
    async fn read(&self, key: &str) -> QueryCacheResult<Option<i64>>;

    /// Set the counter to `value`, creating it if needed.
    async fn init(&self, key: &str, value: i64) -> QueryCacheResult<()>;

    /// Create the counter at `value` unless it already exists. Returns the
    /// value in effect afterwards.
    async fn init_if_absent(&self, key: &str, value: i64) -> QueryCacheResult<i64>;

    /// Atomically add one and return the new value, `None` if the counter
    /// does not exist.
    async fn increment(&self, key: &str) -> QueryCacheResult<Option<i64>>;
}

/// Record store keyed by record id.
#[async_trait]
pub trait RecordStore<R: CacheableRecord>: Send + Sync {
    /// Fetch every record that is present. Missing ids are simply absent
    /// from the returned map.
    async fn get_many(&self, ids: &[RecordId]) -> QueryCacheResult<HashMap<RecordId, R>>;

    /// Store records, replacing existing ones with the same id.
    async fn put_many(&self, records: &[R]) -> QueryCacheResult<()>;
}

/// Rows returned by the source of truth for an unreduced query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRows<R> {
    /// Records in the order the query produced them.
    pub records: Vec<R>,
    /// Total number of matches ignoring pagination, if the source computed it.
    pub found: Option<u64>,
}

impl<R> SourceRows<R> {
    pub fn new(records: Vec<R>, found: Option<u64>) -> Self {
        Self { records, found }
    }
}

/// The source of truth the caller queries when the cache cannot answer.
#[async_trait]
pub trait QuerySource<R: CacheableRecord>: Send + Sync {
    /// Run the original, unreduced query.
    async fn run(&self, request: &QueryRequest) -> QueryCacheResult<SourceRows<R>>;

    /// Run the reduced fetch for exactly `ids`. Order of the result is
    /// irrelevant; ids that no longer exist are omitted.
    async fn fetch_by_ids(&self, ids: &[RecordId]) -> QueryCacheResult<Vec<R>>;
}

/// Statistics about a cache backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of reads that found a live value.
    pub hits: u64,
    /// Number of reads that found nothing or an expired value.
    pub misses: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
    /// Approximate size of stored values in bytes.
    pub memory_bytes: u64,
}

impl BackendStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

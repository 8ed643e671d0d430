//! In-memory reference backends.
//!
//! `InMemoryCacheBackend` implements both [`CacheBackend`] and
//! [`GenerationCounter`], the way a memcached-style object cache serves both
//! roles. `InMemoryRecordStore` is the record store counterpart.
//!
//! Uses tokio::sync locks for safe async access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use querycache_core::{CacheableRecord, Namespace, QueryCacheResult, RecordId};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::entry;
use super::{BackendStats, CacheBackend, GenerationCounter, RecordStore};

/// Entry key: (namespace, key).
type EntryKey = (String, String);

/// In-memory cache backend and generation counter.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<EntryKey, Vec<u8>>>,
    counters: Mutex<HashMap<String, i64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live entry exists, without touching statistics.
    pub async fn contains(&self, key: &str, namespace: &Namespace) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&entry_key(key, namespace))
            .map(|bytes| !entry::is_expired(bytes, Utc::now()))
            .unwrap_or(false)
    }

    /// Number of stored entries across all namespaces, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop entries whose TTL has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> u64 {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, bytes| !entry::is_expired(bytes, now));
        (before - entries.len()) as u64
    }
}

fn entry_key(key: &str, namespace: &Namespace) -> EntryKey {
    (namespace.as_str().to_string(), key.to_string())
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get<T>(&self, key: &str, namespace: &Namespace) -> QueryCacheResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let entries = self.entries.read().await;
        match entries.get(&entry_key(key, namespace)) {
            Some(bytes) if !entry::is_expired(bytes, Utc::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry::decode(key, bytes).map(Some)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set<T>(
        &self,
        key: &str,
        value: &T,
        namespace: &Namespace,
        ttl: Duration,
    ) -> QueryCacheResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = entry::encode(key, value, ttl, Utc::now())?;
        let mut entries = self.entries.write().await;
        entries.insert(entry_key(key, namespace), bytes);
        Ok(())
    }

    async fn add<T>(
        &self,
        key: &str,
        value: &T,
        namespace: &Namespace,
        ttl: Duration,
    ) -> QueryCacheResult<bool>
    where
        T: Serialize + Sync,
    {
        let now = Utc::now();
        let bytes = entry::encode(key, value, ttl, now)?;
        let mut entries = self.entries.write().await;
        let slot = entry_key(key, namespace);
        if let Some(existing) = entries.get(&slot) {
            if !entry::is_expired(existing, now) {
                return Ok(false);
            }
        }
        entries.insert(slot, bytes);
        Ok(true)
    }

    async fn stats(&self) -> QueryCacheResult<BackendStats> {
        let entries = self.entries.read().await;
        Ok(BackendStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            memory_bytes: entries.values().map(|v| v.len() as u64).sum(),
        })
    }
}

#[async_trait]
impl GenerationCounter for InMemoryCacheBackend {
    async fn read(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        Ok(self.counters.lock().await.get(key).copied())
    }

    async fn init(&self, key: &str, value: i64) -> QueryCacheResult<()> {
        self.counters.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn init_if_absent(&self, key: &str, value: i64) -> QueryCacheResult<i64> {
        Ok(*self
            .counters
            .lock()
            .await
            .entry(key.to_string())
            .or_insert(value))
    }

    async fn increment(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        let mut counters = self.counters.lock().await;
        Ok(counters.get_mut(key).map(|value| {
            *value = value.saturating_add(1);
            *value
        }))
    }
}

/// In-memory record store.
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    records: RwLock<HashMap<RecordId, R>>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: CacheableRecord> InMemoryRecordStore<R> {
    /// Create an empty record store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: R) {
        self.records.write().await.insert(record.record_id(), record);
    }

    /// Evict a record. Returns the evicted record, if any.
    pub async fn remove(&self, id: RecordId) -> Option<R> {
        self.records.write().await.remove(&id)
    }

    pub async fn contains(&self, id: RecordId) -> bool {
        self.records.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<R: CacheableRecord> RecordStore<R> for InMemoryRecordStore<R> {
    async fn get_many(&self, ids: &[RecordId]) -> QueryCacheResult<HashMap<RecordId, R>> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (*id, r.clone())))
            .collect())
    }

    async fn put_many(&self, batch: &[R]) -> QueryCacheResult<()> {
        let mut records = self.records.write().await;
        for record in batch {
            records.insert(record.record_id(), record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycache_core::Generation;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: RecordId,
    }

    impl CacheableRecord for Row {
        fn record_id(&self) -> RecordId {
            self.id
        }
    }

    fn ns(generation: i64) -> Namespace {
        Namespace::new("test_", Generation(generation))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("ids", &vec![5u64, 2, 9], &ns(1), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let ids: Option<Vec<u64>> = backend.get("ids", &ns(1)).await.expect("get should succeed");
        assert_eq!(ids, Some(vec![5, 2, 9]));
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("ids", &vec![1u64], &ns(1), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let other: Option<Vec<u64>> = backend.get("ids", &ns(2)).await.expect("get should succeed");
        assert!(other.is_none());
        assert!(backend.contains("ids", &ns(1)).await);
    }

    #[tokio::test]
    async fn test_add_is_insert_only() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);

        assert!(backend.add("n", &10u64, &ns(1), ttl).await.expect("add should succeed"));
        assert!(!backend.add("n", &20u64, &ns(1), ttl).await.expect("add should succeed"));
        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert_eq!(n, Some(10));

        backend.set("n", &30u64, &ns(1), ttl).await.expect("set should succeed");
        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert_eq!(n, Some(30));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_absent_and_can_be_added() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("n", &1u64, &ns(1), Duration::from_millis(1))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert!(n.is_none());
        assert!(backend
            .add("n", &2u64, &ns(1), Duration::from_secs(60))
            .await
            .expect("add should succeed"));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("a", &1u64, &ns(1), Duration::from_millis(1))
            .await
            .expect("set should succeed");
        backend
            .set("b", &1u64, &ns(1), Duration::ZERO)
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_decode_type_mismatch_is_error() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("n", &"not a number", &ns(1), Duration::ZERO)
            .await
            .expect("set should succeed");
        let result = backend.get::<u64>("n", &ns(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = InMemoryCacheBackend::new();
        let _ = backend.get::<u64>("n", &ns(1)).await;
        backend.set("n", &1u64, &ns(1), Duration::ZERO).await.expect("set should succeed");
        let _ = backend.get::<u64>("n", &ns(1)).await;
        let _ = backend.get::<u64>("n", &ns(1)).await;

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
        assert!(stats.memory_bytes > 8);
    }

    #[tokio::test]
    async fn test_counter() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(backend.read("domain").await.expect("read should succeed"), None);
        assert_eq!(backend.increment("domain").await.expect("increment should succeed"), None);

        backend.init("domain", 41).await.expect("init should succeed");
        assert_eq!(backend.increment("domain").await.expect("increment should succeed"), Some(42));
        assert_eq!(backend.read("domain").await.expect("read should succeed"), Some(42));
        assert_eq!(backend.read("other").await.expect("read should succeed"), None);
    }

    #[tokio::test]
    async fn test_init_if_absent_keeps_existing_counter() {
        let backend = InMemoryCacheBackend::new();
        assert_eq!(
            backend
                .init_if_absent("domain", 10)
                .await
                .expect("init_if_absent should succeed"),
            10
        );
        backend.increment("domain").await.expect("increment should succeed");
        assert_eq!(
            backend
                .init_if_absent("domain", 3)
                .await
                .expect("init_if_absent should succeed"),
            11
        );
        assert_eq!(backend.read("domain").await.expect("read should succeed"), Some(11));
    }

    #[tokio::test]
    async fn test_record_store() {
        let store: InMemoryRecordStore<Row> = InMemoryRecordStore::new();
        store
            .put_many(&[Row { id: 1 }, Row { id: 2 }, Row { id: 3 }])
            .await
            .expect("put_many should succeed");
        store.remove(2).await;

        let found = store.get_many(&[1, 2, 3, 4]).await.expect("get_many should succeed");
        assert_eq!(found.len(), 2);
        assert!(found.contains_key(&1));
        assert!(found.contains_key(&3));
        assert!(!store.contains(2).await);
    }
}

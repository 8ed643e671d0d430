//! LMDB-backed cache and generation counter.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist cache entries and
//! generation counters in a memory-mapped store shared by every process that
//! opens the same directory.
//!
//! # Layout
//!
//! Two named databases:
//! - `entries`: `[namespace][0xFF][key]` -> `[expires_at: 8 bytes][json]`
//! - `counters`: `[domain]` -> `[value: 8 bytes LE]`
//!
//! # Atomicity
//!
//! LMDB allows one write transaction at a time per environment, so
//! `add` and `increment` are read-modify-write inside a single write
//! transaction and need no further locking.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use querycache_core::{CacheError, Namespace, QueryCacheError, QueryCacheResult};
use serde::{de::DeserializeOwned, Serialize};

use super::entry;
use super::{BackendStats, CacheBackend, GenerationCounter};

/// Separator byte between namespace and key. Never valid inside UTF-8.
const SEPARATOR: u8 = 0xFF;

const ENTRIES_DB: &str = "entries";
const COUNTERS_DB: &str = "counters";

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Counter value is not 8 bytes.
    #[error("Corrupt counter for {0}")]
    CorruptCounter(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for QueryCacheError {
    fn from(e: LmdbCacheError) -> Self {
        QueryCacheError::Cache(CacheError::BackendUnavailable {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed cache backend and generation counter.
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(LmdbCacheBackend::new("/var/cache/querycache", 256)?);
/// let cache = QueryCache::new(backend.clone(), backend, QueryCacheConfig::default())?;
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    entries: Database<Bytes, Bytes>,
    counters: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB cache in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let entries: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(ENTRIES_DB))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let counters: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(COUNTERS_DB))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            entries,
            counters,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Encode `[namespace][separator][key]`.
    fn entry_key(key: &str, namespace: &Namespace) -> Vec<u8> {
        let ns = namespace.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(ns.len() + 1 + key.len());
        bytes.extend_from_slice(ns);
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(key.as_bytes());
        bytes
    }

    fn decode_counter(key: &str, bytes: &[u8]) -> Result<i64, LmdbCacheError> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| LmdbCacheError::CorruptCounter(key.to_string()))?;
        Ok(i64::from_le_bytes(raw))
    }

    /// Write an entry, optionally refusing to replace a live one.
    fn write_entry(
        &self,
        encoded_key: &[u8],
        bytes: &[u8],
        only_if_absent: bool,
    ) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if only_if_absent {
            let live = match self
                .entries
                .get(&wtxn, encoded_key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                Some(existing) => !entry::is_expired(existing, Utc::now()),
                None => false,
            };
            if live {
                wtxn.abort();
                return Ok(false);
            }
        }

        self.entries
            .put(&mut wtxn, encoded_key, bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(true)
    }

    /// Remove expired entries. Returns how many were deleted.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .entries
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for result in iter {
                match result {
                    Ok((key, value)) if entry::is_expired(value, now) => keys.push(key.to_vec()),
                    Ok(_) => {}
                    Err(_) => continue,
                }
            }
            keys
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &expired {
            if self.entries.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get<T>(&self, key: &str, namespace: &Namespace) -> QueryCacheResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let encoded_key = Self::entry_key(key, namespace);

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.entries.get(&rtxn, &encoded_key) {
            Ok(Some(bytes)) if !entry::is_expired(bytes, Utc::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry::decode(key, bytes).map(Some)
            }
            Ok(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(LmdbCacheError::Transaction(e.to_string()).into())
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
        self.write_entry(&Self::entry_key(key, namespace), &bytes, false)?;
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
        let bytes = entry::encode(key, value, ttl, Utc::now())?;
        Ok(self.write_entry(&Self::entry_key(key, namespace), &bytes, true)?)
    }

    async fn stats(&self) -> QueryCacheResult<BackendStats> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let entry_count = self
            .entries
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut memory_bytes = 0u64;
        let iter = self
            .entries
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        for (_, value) in iter.flatten() {
            memory_bytes += value.len() as u64;
        }

        Ok(BackendStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
        })
    }
}

#[async_trait]
impl GenerationCounter for LmdbCacheBackend {
    async fn read(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self
            .counters
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode_counter(key, bytes)?)),
            None => Ok(None),
        }
    }

    async fn init(&self, key: &str, value: i64) -> QueryCacheResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.counters
            .put(&mut wtxn, key.as_bytes(), &value.to_le_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn init_if_absent(&self, key: &str, value: i64) -> QueryCacheResult<i64> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let existing = self
            .counters
            .get(&wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            .map(|bytes| Self::decode_counter(key, bytes))
            .transpose()?;

        if let Some(existing) = existing {
            wtxn.abort();
            return Ok(existing);
        }

        self.counters
            .put(&mut wtxn, key.as_bytes(), &value.to_le_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(value)
    }

    async fn increment(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let current = self
            .counters
            .get(&wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            .map(|bytes| Self::decode_counter(key, bytes))
            .transpose()?;

        let Some(current) = current else {
            wtxn.abort();
            return Ok(None);
        };

        let next = current.saturating_add(1);
        self.counters
            .put(&mut wtxn, key.as_bytes(), &next.to_le_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycache_core::Generation;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn ns(generation: i64) -> Namespace {
        Namespace::new("querycache_", Generation(generation))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("abc", &vec![5u64, 2, 9], &ns(7), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let ids: Option<Vec<u64>> = backend.get("abc", &ns(7)).await.expect("get should succeed");
        assert_eq!(ids, Some(vec![5, 2, 9]));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let value: Option<u64> = backend.get("missing", &ns(1)).await.expect("get should succeed");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("abc", &12u64, &ns(1), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let other: Option<u64> = backend.get("abc", &ns(2)).await.expect("get should succeed");
        assert!(other.is_none(), "a new generation must not see old entries");

        let original: Option<u64> = backend.get("abc", &ns(1)).await.expect("get should succeed");
        assert_eq!(original, Some(12), "old namespace entries still exist physically");
    }

    #[tokio::test]
    async fn test_add_does_not_overwrite() {
        let (backend, _temp_dir) = create_test_backend();
        let ttl = Duration::from_secs(60);

        assert!(backend.add("n", &1u64, &ns(1), ttl).await.expect("add should succeed"));
        assert!(!backend.add("n", &2u64, &ns(1), ttl).await.expect("add should succeed"));

        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert_eq!(n, Some(1));
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (backend, _temp_dir) = create_test_backend();
        let ttl = Duration::from_secs(60);

        backend.set("n", &1u64, &ns(1), ttl).await.expect("set should succeed");
        backend.set("n", &2u64, &ns(1), ttl).await.expect("set should succeed");

        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert_eq!(n, Some(2));
    }

    #[tokio::test]
    async fn test_expired_entries() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("n", &1u64, &ns(1), Duration::from_millis(1))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let n: Option<u64> = backend.get("n", &ns(1)).await.expect("get should succeed");
        assert!(n.is_none());

        // An expired entry does not block insert-only writes
        assert!(backend
            .add("n", &2u64, &ns(1), Duration::from_secs(60))
            .await
            .expect("add should succeed"));

        backend
            .set("m", &1u64, &ns(1), Duration::from_millis(1))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.purge_expired().expect("purge should succeed"), 1);
    }

    #[tokio::test]
    async fn test_counter() {
        let (backend, _temp_dir) = create_test_backend();

        assert_eq!(backend.read("domain").await.expect("read should succeed"), None);
        assert_eq!(backend.increment("domain").await.expect("increment should succeed"), None);

        backend.init("domain", 9).await.expect("init should succeed");
        assert_eq!(backend.increment("domain").await.expect("increment should succeed"), Some(10));
        assert_eq!(backend.increment("domain").await.expect("increment should succeed"), Some(11));
        assert_eq!(backend.read("domain").await.expect("read should succeed"), Some(11));
    }

    #[tokio::test]
    async fn test_init_if_absent_never_lowers_counter() {
        let (backend, _temp_dir) = create_test_backend();

        assert_eq!(
            backend
                .init_if_absent("domain", 500)
                .await
                .expect("init_if_absent should succeed"),
            500
        );
        backend.increment("domain").await.expect("increment should succeed");
        assert_eq!(
            backend
                .init_if_absent("domain", 400)
                .await
                .expect("init_if_absent should succeed"),
            501
        );
        assert_eq!(backend.read("domain").await.expect("read should succeed"), Some(501));
    }

    #[tokio::test]
    async fn test_counter_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend =
                LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
            backend.init("domain", 100).await.expect("init should succeed");
            backend.increment("domain").await.expect("increment should succeed");
        }

        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend reopen should succeed");
        assert_eq!(backend.read("domain").await.expect("read should succeed"), Some(101));
    }

    #[tokio::test]
    async fn test_stats() {
        let (backend, _temp_dir) = create_test_backend();

        let _ = backend.get::<u64>("n", &ns(1)).await;
        backend
            .set("n", &1u64, &ns(1), Duration::ZERO)
            .await
            .expect("set should succeed");
        let _ = backend.get::<u64>("n", &ns(1)).await;
        let _ = backend.get::<u64>("n", &ns(1)).await;

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }
}

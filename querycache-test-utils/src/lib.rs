//! QueryCache Test Utilities
//!
//! Shared test infrastructure for the QueryCache workspace:
//! - A concrete record type and a counting mock query source
//! - Backends that can be switched into a failing state
//! - Proptest generators for ids, options and requests
//! - Fixtures and assertions for common scenarios

pub use querycache_core::{
    CacheError, CacheableRecord, ConfigError, FoundCountState, QueryCacheConfig, QueryCacheError,
    QueryCacheResult, QueryFingerprint, QueryOptions, QueryRequest, RecordId, SourceError,
    WriteMode,
};
pub use querycache_storage::{
    BackendStats, CacheBackend, GenerationCounter, InMemoryCacheBackend, InMemoryRecordStore,
    InvalidationScope, QueryCache, QueryResult, QuerySource, RecordStore, ResolutionKind,
    SourceRows,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use querycache_core::Namespace;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

// ============================================================================
// RECORDS AND SOURCES
// ============================================================================

/// Minimal record used across the test suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: RecordId,
    pub title: String,
}

impl TestRecord {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            title: format!("record {}", id),
        }
    }
}

impl CacheableRecord for TestRecord {
    fn record_id(&self) -> RecordId {
        self.id
    }
}

/// Source of truth backed by an ordered list of records.
///
/// `run` returns the first `limit` records with the full length as the found
/// count. `fetch_by_ids` returns matches in reverse request order, so callers
/// that forget to collate are caught.
#[derive(Debug, Default)]
pub struct MockQuerySource {
    records: RwLock<Vec<TestRecord>>,
    runs: AtomicUsize,
    fetches: AtomicUsize,
    last_fetch: Mutex<Vec<RecordId>>,
    failing: AtomicBool,
}

impl MockQuerySource {
    pub fn new(records: Vec<TestRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Default::default()
        }
    }

    /// Source holding one [`TestRecord`] per id, in the given order.
    pub fn with_ids(ids: &[RecordId]) -> Self {
        Self::new(fixtures::records(ids))
    }

    /// Delete a record from the source of truth.
    pub async fn remove(&self, id: RecordId) {
        self.records.write().await.retain(|r| r.id != id);
    }

    pub async fn push(&self, record: TestRecord) {
        self.records.write().await.push(record);
    }

    /// Make every call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Ids passed to the most recent reduced fetch.
    pub async fn last_fetch(&self) -> Vec<RecordId> {
        self.last_fetch.lock().await.clone()
    }
}

#[async_trait]
impl QuerySource<TestRecord> for MockQuerySource {
    async fn run(&self, request: &QueryRequest) -> QueryCacheResult<SourceRows<TestRecord>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::QueryFailed {
                reason: format!("query failed: {}", request.representation),
            }
            .into());
        }

        let records = self.records.read().await;
        let limit = request
            .options
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(records.len());
        let page = records.iter().take(limit).cloned().collect();
        let found = (!request.options.no_found_rows).then_some(records.len() as u64);
        Ok(SourceRows::new(page, found))
    }

    async fn fetch_by_ids(&self, ids: &[RecordId]) -> QueryCacheResult<Vec<TestRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_fetch.lock().await = ids.to_vec();
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::FetchFailed {
                count: ids.len(),
                reason: "source unavailable".to_string(),
            }
            .into());
        }

        let records = self.records.read().await;
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| records.iter().find(|r| r.id == *id).cloned())
            .collect())
    }
}

// ============================================================================
// FAILING BACKENDS
// ============================================================================

/// In-memory backend whose entry and counter operations can be made to fail
/// independently.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: InMemoryCacheBackend,
    entries_down: AtomicBool,
    counter_down: AtomicBool,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    /// Fail `get`, `set` and `add`.
    pub fn fail_entries(&self, down: bool) {
        self.entries_down.store(down, Ordering::SeqCst);
    }

    /// Fail `read`, `init` and `increment`.
    pub fn fail_counter(&self, down: bool) {
        self.counter_down.store(down, Ordering::SeqCst);
    }

    fn check_entries(&self) -> QueryCacheResult<()> {
        if self.entries_down.load(Ordering::SeqCst) {
            return Err(CacheError::BackendUnavailable {
                reason: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_counter(&self, key: &str) -> QueryCacheResult<()> {
        if self.counter_down.load(Ordering::SeqCst) {
            return Err(CacheError::CounterUnavailable {
                domain: key.to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get<T>(&self, key: &str, namespace: &Namespace) -> QueryCacheResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.check_entries()?;
        self.inner.get(key, namespace).await
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
        self.check_entries()?;
        self.inner.set(key, value, namespace, ttl).await
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
        self.check_entries()?;
        self.inner.add(key, value, namespace, ttl).await
    }

    async fn stats(&self) -> QueryCacheResult<BackendStats> {
        self.inner.stats().await
    }
}

#[async_trait]
impl GenerationCounter for FlakyBackend {
    async fn read(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        self.check_counter(key)?;
        self.inner.read(key).await
    }

    async fn init(&self, key: &str, value: i64) -> QueryCacheResult<()> {
        self.check_counter(key)?;
        self.inner.init(key, value).await
    }

    async fn init_if_absent(&self, key: &str, value: i64) -> QueryCacheResult<i64> {
        self.check_counter(key)?;
        self.inner.init_if_absent(key, value).await
    }

    async fn increment(&self, key: &str) -> QueryCacheResult<Option<i64>> {
        self.check_counter(key)?;
        self.inner.increment(key).await
    }
}

/// Record store that can be made to fail.
#[derive(Debug)]
pub struct FlakyRecordStore<R> {
    inner: InMemoryRecordStore<R>,
    down: AtomicBool,
}

impl<R: CacheableRecord> Default for FlakyRecordStore<R> {
    fn default() -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            down: AtomicBool::new(false),
        }
    }
}

impl<R: CacheableRecord> FlakyRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryRecordStore<R> {
        &self.inner
    }

    pub fn fail(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> QueryCacheResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::RecordStoreUnavailable {
                reason: "record store offline".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<R: CacheableRecord> RecordStore<R> for FlakyRecordStore<R> {
    async fn get_many(&self, ids: &[RecordId]) -> QueryCacheResult<HashMap<RecordId, R>> {
        self.check()?;
        self.inner.get_many(ids).await
    }

    async fn put_many(&self, records: &[R]) -> QueryCacheResult<()> {
        self.check()?;
        self.inner.put_many(records).await
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("querycache_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for QueryCache types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a record id.
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        1u64..100_000
    }

    /// Generate an ordered list of distinct ids.
    pub fn arb_id_list(max_len: usize) -> impl Strategy<Value = Vec<RecordId>> {
        proptest::collection::hash_set(arb_record_id(), 0..=max_len)
            .prop_map(|ids| ids.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    }

    /// Generate query options covering all three found-count states.
    pub fn arb_query_options() -> impl Strategy<Value = QueryOptions> {
        prop_oneof![
            (1u64..100).prop_map(QueryOptions::paginated),
            Just(QueryOptions::unbounded()),
            (1u64..100).prop_map(|n| QueryOptions::paginated(n).without_found_rows()),
        ]
    }

    /// Generate a query request, with or without a record kind.
    pub fn arb_query_request() -> impl Strategy<Value = QueryRequest> {
        (
            "[a-z ]{1,40}",
            proptest::option::of("[a-z]{1,10}"),
            arb_query_options(),
        )
            .prop_map(|(text, kind, options)| {
                let request = QueryRequest::new(format!("SELECT id WHERE {}", text), options);
                match kind {
                    Some(kind) => request.with_kind(kind),
                    None => request,
                }
            })
    }

    /// Generate a config that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = QueryCacheConfig> {
        ("[a-z]{1,12}", "[a-z]{1,8}_", 1u64..86_400, 1usize..=18).prop_map(
            |(domain, prefix, ttl, digits)| {
                QueryCacheConfig::default()
                    .with_domain(domain)
                    .with_group_prefix(prefix)
                    .with_ttl(Duration::from_secs(ttl))
                    .with_max_generation_digits(digits)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// One [`TestRecord`] per id, in the given order.
    pub fn records(ids: &[RecordId]) -> Vec<TestRecord> {
        ids.iter().map(|&id| TestRecord::new(id)).collect()
    }

    /// A paginated request for `limit` rows.
    pub fn paginated_request(text: &str, limit: u64) -> QueryRequest {
        QueryRequest::new(text, QueryOptions::paginated(limit))
    }

    /// A cache over one in-memory backend serving both roles.
    pub fn memory_cache(
        config: QueryCacheConfig,
    ) -> (
        QueryCache<InMemoryCacheBackend, InMemoryCacheBackend>,
        Arc<InMemoryCacheBackend>,
    ) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = QueryCache::new(Arc::clone(&backend), Arc::clone(&backend), config)
            .unwrap_or_else(|e| panic!("fixture config must be valid: {}", e));
        (cache, backend)
    }

    /// A cache over a [`FlakyBackend`].
    pub fn flaky_cache() -> (QueryCache<FlakyBackend, FlakyBackend>, Arc<FlakyBackend>) {
        let backend = Arc::new(FlakyBackend::new());
        let cache = QueryCache::with_defaults(Arc::clone(&backend), Arc::clone(&backend));
        (cache, backend)
    }

    /// A record store pre-filled with one [`TestRecord`] per id.
    pub async fn record_store(ids: &[RecordId]) -> InMemoryRecordStore<TestRecord> {
        let store = InMemoryRecordStore::new();
        for &id in ids {
            store.insert(TestRecord::new(id)).await;
        }
        store
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for query results.

    use super::*;

    /// Assert the ids of a result, in order.
    #[track_caller]
    pub fn assert_ids<R: CacheableRecord>(result: &QueryResult<R>, expected: &[RecordId]) {
        assert_eq!(result.ids(), expected, "result ids out of order or incomplete");
    }

    /// Assert how a result was produced.
    #[track_caller]
    pub fn assert_resolution<R>(result: &QueryResult<R>, expected: ResolutionKind) {
        assert_eq!(
            result.resolution, expected,
            "expected {:?}, got {:?}",
            expected, result.resolution
        );
    }

    /// Assert that a result is a Source error.
    #[track_caller]
    pub fn assert_source_error<T: std::fmt::Debug>(result: &QueryCacheResult<T>) {
        match result {
            Err(QueryCacheError::Source(_)) => {}
            other => panic!("Expected Source error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

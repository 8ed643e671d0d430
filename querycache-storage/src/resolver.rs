//! Hit/miss resolution.
//!
//! Classifies a request as a full hit, a partial hit or a miss, and for a
//! partial hit computes the smallest fetch that completes the result. Every
//! failure on the way is logged and read as "absent"; resolution itself
//! cannot fail.

use std::collections::HashMap;

use querycache_core::{
    CacheableRecord, FoundCountState, Namespace, QueryCacheError, QueryFingerprint, RecordId,
};

use crate::backend::{CacheBackend, RecordStore};
use crate::collate::{collate, IdOrder};
use crate::context::{FoundCountLookup, IdListLookup, QueryContext};
use crate::stats::StatsRecorder;

/// A fetch restricted to the records a partial hit could not serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedFetch {
    ids: Vec<RecordId>,
}

impl ReducedFetch {
    pub fn new(ids: Vec<RecordId>) -> Self {
        Self { ids }
    }

    /// Ids to fetch, in cached list order.
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<RecordId> {
        self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What the caller has to do to finish the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    /// Every listed record was available. `records` are in final order.
    Hit { records: Vec<R> },
    /// Some listed records were missing from the record store.
    Partial { cached: Vec<R>, fetch: ReducedFetch },
    /// Nothing usable was cached. Run the original query.
    Miss,
}

/// Coarse classification of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    Hit,
    Partial,
    Miss,
}

impl<R> Outcome<R> {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            Self::Hit { .. } => ResolutionKind::Hit,
            Self::Partial { .. } => ResolutionKind::Partial,
            Self::Miss => ResolutionKind::Miss,
        }
    }
}

/// The context and outcome of resolving one request.
#[derive(Debug, Clone)]
pub struct Resolution<R> {
    pub context: QueryContext,
    pub outcome: Outcome<R>,
}

impl<R> Resolution<R> {
    pub fn kind(&self) -> ResolutionKind {
        self.outcome.kind()
    }

    pub fn is_hit(&self) -> bool {
        self.kind() == ResolutionKind::Hit
    }

    pub fn into_parts(self) -> (QueryContext, Outcome<R>) {
        (self.context, self.outcome)
    }
}

/// Read both entries for `fingerprint` under `namespace`.
///
/// The found-count entry is only read in the `Pending` state.
pub(crate) async fn lookup_entries<C: CacheBackend>(
    backend: &C,
    fingerprint: &QueryFingerprint,
    namespace: &Namespace,
    state: FoundCountState,
    stats: &StatsRecorder,
) -> (IdListLookup, FoundCountLookup) {
    let id_list = match backend
        .get::<Vec<RecordId>>(fingerprint.id_list_key(), namespace)
        .await
    {
        Ok(cached) => IdListLookup::from_cached(cached),
        Err(err) => {
            lookup_failed(stats, fingerprint, namespace, "id list", &err);
            IdListLookup::Absent
        }
    };

    let found_count = if state.consults_entry() {
        match backend
            .get::<u64>(&fingerprint.found_count_key(), namespace)
            .await
        {
            Ok(Some(count)) => FoundCountLookup::Count(count),
            Ok(None) => FoundCountLookup::Absent,
            Err(err) => {
                lookup_failed(stats, fingerprint, namespace, "found count", &err);
                FoundCountLookup::Absent
            }
        }
    } else {
        FoundCountLookup::NotConsulted(state)
    };

    (id_list, found_count)
}

/// Classify a context whose lookups already ran, fetching listed records
/// from the record store on a hit signal.
pub(crate) async fn resolve_records<R, S>(
    records: &S,
    context: &mut QueryContext,
    stats: &StatsRecorder,
) -> Outcome<R>
where
    R: CacheableRecord,
    S: RecordStore<R> + ?Sized,
{
    if !context.is_cached() {
        return Outcome::Miss;
    }

    let listed: Vec<RecordId> = context.id_list().as_list().unwrap_or_default().to_vec();
    if listed.is_empty() {
        return Outcome::Hit { records: Vec::new() };
    }

    let mut found: HashMap<RecordId, R> = match records.get_many(&listed).await {
        Ok(found) => found,
        Err(err) => {
            stats.backend_error();
            tracing::warn!(
                fingerprint = %context.fingerprint(),
                error = %err,
                "Record store read failed, treating records as uncached"
            );
            HashMap::new()
        }
    };

    let mut cached_ids = Vec::with_capacity(found.len());
    let mut uncached = Vec::new();
    let mut cached = Vec::with_capacity(found.len());
    for id in &listed {
        match found.remove(id) {
            Some(record) => {
                cached_ids.push(*id);
                cached.push(record);
            }
            None => uncached.push(*id),
        }
    }
    context.set_cached_ids(cached_ids);

    if uncached.is_empty() {
        let order = IdOrder::new(listed);
        return Outcome::Hit {
            records: collate(&order, cached, Vec::new()),
        };
    }

    Outcome::Partial {
        cached,
        fetch: ReducedFetch::new(uncached),
    }
}

fn lookup_failed(
    stats: &StatsRecorder,
    fingerprint: &QueryFingerprint,
    namespace: &Namespace,
    entry: &str,
    err: &QueryCacheError,
) {
    stats.backend_error();
    tracing::warn!(
        fingerprint = %fingerprint,
        namespace = %namespace,
        entry,
        error = %err,
        "Cache lookup failed, treating entry as absent"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryCacheBackend, InMemoryRecordStore};
    use async_trait::async_trait;
    use querycache_core::{CacheError, Generation, QueryCacheResult};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: RecordId,
    }

    impl CacheableRecord for Row {
        fn record_id(&self) -> RecordId {
            self.id
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore<Row> for BrokenStore {
        async fn get_many(&self, _ids: &[RecordId]) -> QueryCacheResult<HashMap<RecordId, Row>> {
            Err(CacheError::RecordStoreUnavailable {
                reason: "down".to_string(),
            }
            .into())
        }

        async fn put_many(&self, _records: &[Row]) -> QueryCacheResult<()> {
            Ok(())
        }
    }

    fn fp() -> QueryFingerprint {
        QueryFingerprint::from_representation("SELECT ids WHERE x")
    }

    fn ns() -> Namespace {
        Namespace::new("querycache_", Generation(100))
    }

    fn context(ids: IdListLookup, count: FoundCountLookup) -> QueryContext {
        QueryContext::new(fp(), ns(), FoundCountState::Pending, ids, count)
    }

    async fn store_with(ids: &[RecordId]) -> InMemoryRecordStore<Row> {
        let store = InMemoryRecordStore::new();
        for &id in ids {
            store.insert(Row { id }).await;
        }
        store
    }

    #[tokio::test]
    async fn test_lookup_reads_both_entries_when_pending() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend
            .set(fp().id_list_key(), &vec![3u64, 1], &ns(), ttl)
            .await
            .expect("set should succeed");
        backend
            .set(&fp().found_count_key(), &40u64, &ns(), ttl)
            .await
            .expect("set should succeed");

        let stats = StatsRecorder::default();
        let (ids, count) =
            lookup_entries(&backend, &fp(), &ns(), FoundCountState::Pending, &stats).await;
        assert_eq!(ids, IdListLookup::Ids(vec![3, 1]));
        assert_eq!(count, FoundCountLookup::Count(40));
    }

    #[tokio::test]
    async fn test_lookup_skips_found_entry_outside_pending() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set(&fp().found_count_key(), &40u64, &ns(), Duration::ZERO)
            .await
            .expect("set should succeed");

        let stats = StatsRecorder::default();
        let (_, count) =
            lookup_entries(&backend, &fp(), &ns(), FoundCountState::Unbounded, &stats).await;
        assert_eq!(count, FoundCountLookup::NotConsulted(FoundCountState::Unbounded));

        let backend_stats = backend.stats().await.expect("stats should succeed");
        // Only the id list was read
        assert_eq!(backend_stats.hits + backend_stats.misses, 1);
    }

    #[tokio::test]
    async fn test_lookup_decode_failure_reads_absent() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set(fp().id_list_key(), &"garbage", &ns(), Duration::ZERO)
            .await
            .expect("set should succeed");

        let stats = StatsRecorder::default();
        let (ids, _) =
            lookup_entries(&backend, &fp(), &ns(), FoundCountState::Pending, &stats).await;
        assert_eq!(ids, IdListLookup::Absent);
        assert_eq!(stats.snapshot().backend_errors, 1);
    }

    #[tokio::test]
    async fn test_full_hit_in_list_order() {
        let store = store_with(&[1, 2, 3]).await;
        let mut ctx = context(IdListLookup::Ids(vec![3, 1, 2]), FoundCountLookup::Count(3));

        let outcome = resolve_records(&store, &mut ctx, &StatsRecorder::default()).await;
        match outcome {
            Outcome::Hit { records } => {
                let ids: Vec<_> = records.iter().map(|r| r.id).collect();
                assert_eq!(ids, vec![3, 1, 2]);
            }
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(ctx.cached_ids(), &[3, 1, 2]);
    }

    #[tokio::test]
    async fn test_partial_hit_reduces_fetch() {
        let store = store_with(&[1, 3]).await;
        let mut ctx = context(IdListLookup::Ids(vec![1, 2, 3]), FoundCountLookup::Count(3));

        let outcome = resolve_records(&store, &mut ctx, &StatsRecorder::default()).await;
        match outcome {
            Outcome::Partial { cached, fetch } => {
                assert_eq!(fetch.ids(), &[2]);
                assert_eq!(cached.len(), 2);
            }
            other => panic!("expected partial hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_list_is_hit() {
        let store = store_with(&[]).await;
        let mut ctx = context(IdListLookup::Empty, FoundCountLookup::Count(0));

        let outcome = resolve_records(&store, &mut ctx, &StatsRecorder::default()).await;
        assert_eq!(outcome, Outcome::Hit { records: vec![] });
    }

    #[tokio::test]
    async fn test_missing_count_is_miss() {
        let store = store_with(&[1]).await;
        let mut ctx = context(IdListLookup::Ids(vec![1]), FoundCountLookup::Absent);

        let outcome = resolve_records(&store, &mut ctx, &StatsRecorder::default()).await;
        assert_eq!(outcome, Outcome::Miss);
    }

    #[tokio::test]
    async fn test_record_store_failure_fetches_everything() {
        let mut ctx = context(IdListLookup::Ids(vec![7, 8]), FoundCountLookup::Count(2));
        let stats = StatsRecorder::default();

        let outcome = resolve_records(&BrokenStore, &mut ctx, &stats).await;
        match outcome {
            Outcome::Partial { cached, fetch } => {
                assert!(cached.is_empty());
                assert_eq!(fetch.ids(), &[7, 8]);
            }
            other => panic!("expected partial hit, got {:?}", other),
        }
        assert_eq!(stats.snapshot().backend_errors, 1);
    }
}

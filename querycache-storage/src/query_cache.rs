//! Read-through query cache.
//!
//! [`QueryCache`] ties the pieces together for one cache domain: it reads the
//! current namespace from the generation store, resolves requests against the
//! cache backend and record store, primes entries after a miss, and bumps the
//! generation on invalidation.
//!
//! Callers that drive their own query execution use [`QueryCache::resolve`],
//! run whatever the [`Outcome`] asks for, then finish with
//! [`QueryCache::complete_partial`] or [`QueryCache::complete_miss`].
//! [`QueryCache::execute`] does all of that against a [`QuerySource`].

use std::sync::Arc;
use std::time::Duration;

use querycache_core::{
    CacheableRecord, FoundCountState, QueryCacheConfig, QueryCacheResult, QueryFingerprint,
    QueryRequest, RecordId,
};

use crate::backend::{CacheBackend, GenerationCounter, QuerySource, RecordStore, SourceRows};
use crate::collate::{collate, IdOrder};
use crate::context::QueryContext;
use crate::generation::GenerationStore;
use crate::invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationScope};
use crate::resolver::{self, Outcome, Resolution, ResolutionKind};
use crate::stats::{QueryCacheStats, StatsRecorder};
use crate::write_back::{self, PrimeOutcome};

/// Final records and total count for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<R> {
    /// Records in result order.
    pub records: Vec<R>,
    /// Total matches ignoring pagination, when known.
    pub found: Option<u64>,
    /// How the result was produced.
    pub resolution: ResolutionKind,
}

impl<R: CacheableRecord> QueryResult<R> {
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(CacheableRecord::record_id).collect()
    }
}

/// Read-through cache for list queries in one domain.
///
/// # Type Parameters
///
/// - `C`: the cache backend holding ID-list and found-count entries
/// - `G`: the generation counter backing namespace invalidation
///
/// # Example
///
/// ```ignore
/// let cache = QueryCache::with_defaults(backend.clone(), backend);
/// let mut scope = InvalidationScope::new();
///
/// let result = cache.execute(&request, &mut scope, &records, &source).await?;
///
/// // After a write to the source of truth
/// cache.invalidate(&mut scope).await?;
/// ```
pub struct QueryCache<C, G>
where
    C: CacheBackend,
    G: GenerationCounter,
{
    backend: Arc<C>,
    generations: GenerationStore<G>,
    config: QueryCacheConfig,
    stats: Arc<StatsRecorder>,
}

impl<C, G> QueryCache<C, G>
where
    C: CacheBackend,
    G: GenerationCounter,
{
    /// Create a cache for the domain named in `config`.
    pub fn new(backend: Arc<C>, counter: Arc<G>, config: QueryCacheConfig) -> QueryCacheResult<Self> {
        config.validate()?;
        Ok(Self::build(backend, counter, config))
    }

    /// Create a cache with default configuration.
    pub fn with_defaults(backend: Arc<C>, counter: Arc<G>) -> Self {
        Self::build(backend, counter, QueryCacheConfig::default())
    }

    fn build(backend: Arc<C>, counter: Arc<G>, config: QueryCacheConfig) -> Self {
        Self {
            backend,
            generations: GenerationStore::new(counter, &config),
            config,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn generations(&self) -> &GenerationStore<G> {
        &self.generations
    }

    /// Snapshot of resolution statistics.
    pub fn stats(&self) -> QueryCacheStats {
        self.stats.snapshot()
    }

    /// Resolve a request against the cache.
    ///
    /// Never fails: backend and record store errors are logged and read as
    /// absent entries, which at worst turns the request into a miss.
    pub async fn resolve<R, S>(&self, request: &QueryRequest, records: &S) -> Resolution<R>
    where
        R: CacheableRecord,
        S: RecordStore<R> + ?Sized,
    {
        let fingerprint = QueryFingerprint::of(request);
        let state = request.found_count_state();

        if self.config.bypasses(request.kind.as_deref()) {
            self.stats.bypass();
            tracing::debug!(
                fingerprint = %fingerprint,
                kind = request.kind.as_deref().unwrap_or_default(),
                "Record kind bypasses query cache"
            );
            return Resolution {
                context: QueryContext::bypassed(fingerprint, state),
                outcome: Outcome::Miss,
            };
        }

        let namespace = match self.generations.current_namespace().await {
            Ok(namespace) => namespace,
            Err(err) => {
                self.stats.backend_error();
                self.stats.miss();
                tracing::warn!(
                    domain = %self.generations.domain(),
                    fingerprint = %fingerprint,
                    error = %err,
                    "Generation unavailable, resolving as miss without write-back"
                );
                return Resolution {
                    context: QueryContext::detached(fingerprint, state),
                    outcome: Outcome::Miss,
                };
            }
        };

        let (id_list, found_count) = resolver::lookup_entries(
            self.backend.as_ref(),
            &fingerprint,
            &namespace,
            state,
            &self.stats,
        )
        .await;
        let mut context = QueryContext::new(fingerprint, namespace, state, id_list, found_count);
        let outcome = resolver::resolve_records(records, &mut context, &self.stats).await;

        match &outcome {
            Outcome::Hit { records } => {
                self.stats.hit();
                tracing::debug!(
                    fingerprint = %context.fingerprint(),
                    namespace = ?context.namespace().map(|ns| ns.as_str()),
                    records = records.len(),
                    "Query cache hit"
                );
            }
            Outcome::Partial { fetch, .. } => {
                self.stats.partial_hit();
                tracing::debug!(
                    fingerprint = %context.fingerprint(),
                    uncached = ?fetch.ids(),
                    "Query cache partial hit"
                );
            }
            Outcome::Miss => {
                self.stats.miss();
                tracing::debug!(
                    fingerprint = %context.fingerprint(),
                    write_mode = ?context.write_mode(),
                    "Query cache miss"
                );
            }
        }

        Resolution { context, outcome }
    }

    /// Store the ordered id list and found count for a resolved request.
    ///
    /// `ttl` overrides the configured entry TTL; zero means no expiry.
    /// Anything stored marks `scope` as written, so its next flush bumps.
    pub async fn prime(
        &self,
        context: &QueryContext,
        scope: &mut InvalidationScope,
        ids: &[RecordId],
        found: Option<u64>,
        ttl: Option<Duration>,
    ) -> PrimeOutcome {
        let ttl = ttl.unwrap_or_else(|| self.config.entry_ttl());
        let outcome = write_back::write_entries(
            self.backend.as_ref(),
            context,
            ids,
            found,
            ttl,
            &self.stats,
        )
        .await;

        if outcome.stored_any() {
            self.stats.prime();
            scope.mark_written();
        }
        outcome
    }

    /// Finish a partial hit with the records returned by the reduced fetch.
    pub fn complete_partial<R: CacheableRecord>(
        &self,
        context: &QueryContext,
        cached: Vec<R>,
        fresh: Vec<R>,
    ) -> QueryResult<R> {
        let order = IdOrder::new(context.id_list().as_list().unwrap_or_default().to_vec());
        let records = collate(&order, cached, fresh);
        let found = context
            .found_count_state()
            .reported_count(context.found_count().count(), records.len());

        QueryResult {
            records,
            found,
            resolution: ResolutionKind::Partial,
        }
    }

    /// Finish a miss with the rows from the original query, priming the
    /// cache with them.
    pub async fn complete_miss<R: CacheableRecord>(
        &self,
        context: &QueryContext,
        scope: &mut InvalidationScope,
        rows: SourceRows<R>,
        ttl: Option<Duration>,
    ) -> QueryResult<R> {
        let SourceRows { records, found } = rows;
        let order = IdOrder::from_records(&records);
        let found = match context.found_count_state() {
            FoundCountState::Pending => found,
            state => state.reported_count(None, records.len()),
        };

        self.prime(context, scope, order.ids(), found, ttl).await;

        QueryResult {
            records,
            found,
            resolution: ResolutionKind::Miss,
        }
    }

    /// Resolve and finish a request end to end.
    ///
    /// Records fetched from `source` are written to `records` so the next
    /// identical request can be served from cache. Errors from `source` are
    /// returned; cache-side errors are not.
    pub async fn execute<R, S, Q>(
        &self,
        request: &QueryRequest,
        scope: &mut InvalidationScope,
        records: &S,
        source: &Q,
    ) -> QueryCacheResult<QueryResult<R>>
    where
        R: CacheableRecord,
        S: RecordStore<R> + ?Sized,
        Q: QuerySource<R> + ?Sized,
    {
        let (context, outcome) = self.resolve(request, records).await.into_parts();

        match outcome {
            Outcome::Hit { records } => {
                let found = context
                    .found_count_state()
                    .reported_count(context.found_count().count(), records.len());
                Ok(QueryResult {
                    records,
                    found,
                    resolution: ResolutionKind::Hit,
                })
            }
            Outcome::Partial { cached, fetch } => {
                let fresh = source.fetch_by_ids(fetch.ids()).await?;
                self.warm(&context, records, &fresh).await;
                Ok(self.complete_partial(&context, cached, fresh))
            }
            Outcome::Miss => {
                let rows = source.run(request).await?;
                self.warm(&context, records, &rows.records).await;
                Ok(self.complete_miss(&context, scope, rows, None).await)
            }
        }
    }

    /// Bump the generation, abandoning every entry in the current namespace.
    ///
    /// Suppressed scopes do nothing. A scope that already flushed does nothing
    /// until it writes to the cache again. Counter failures are returned.
    pub async fn invalidate(
        &self,
        scope: &mut InvalidationScope,
    ) -> QueryCacheResult<InvalidationOutcome> {
        if scope.is_suppressed() {
            tracing::debug!(domain = %self.generations.domain(), "Invalidation suppressed");
            return Ok(InvalidationOutcome::Suppressed);
        }
        if scope.is_flushed() {
            return Ok(InvalidationOutcome::Collapsed);
        }

        match self.generations.bump().await {
            Ok(bump) => {
                self.stats.invalidation(bump.overflowed);
                scope.mark_flushed();
                Ok(InvalidationOutcome::Bumped(bump.generation))
            }
            Err(err) => {
                tracing::warn!(
                    domain = %self.generations.domain(),
                    error = %err,
                    "Generation bump failed, cache not invalidated"
                );
                Err(err)
            }
        }
    }

    /// Apply a host event: count updates toggle suppression, every other
    /// event invalidates.
    pub async fn handle_event(
        &self,
        scope: &mut InvalidationScope,
        event: &InvalidationEvent,
    ) -> QueryCacheResult<InvalidationOutcome> {
        match event {
            InvalidationEvent::CountUpdateStarted => {
                scope.suppress(true);
                Ok(InvalidationOutcome::SuppressionChanged { suppressed: true })
            }
            InvalidationEvent::CountUpdateFinished => {
                scope.suppress(false);
                Ok(InvalidationOutcome::SuppressionChanged { suppressed: false })
            }
            _ => self.invalidate(scope).await,
        }
    }

    async fn warm<R, S>(&self, context: &QueryContext, records: &S, fresh: &[R])
    where
        R: CacheableRecord,
        S: RecordStore<R> + ?Sized,
    {
        if fresh.is_empty() || context.is_bypassed() {
            return;
        }
        if let Err(err) = records.put_many(fresh).await {
            self.stats.backend_error();
            tracing::warn!(
                fingerprint = %context.fingerprint(),
                count = fresh.len(),
                error = %err,
                "Record store write failed"
            );
        }
    }
}

impl<C, G> Clone for QueryCache<C, G>
where
    C: CacheBackend,
    G: GenerationCounter,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            generations: self.generations.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

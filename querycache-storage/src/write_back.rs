//! Write-back of resolved results.

use std::time::Duration;

use querycache_core::{FoundCountState, Namespace, QueryCacheResult, RecordId, WriteMode};
use serde::Serialize;

use crate::backend::CacheBackend;
use crate::context::QueryContext;
use crate::stats::StatsRecorder;

/// Why a prime stored nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty results are never cached.
    EmptyResult,
    /// The namespace was unknown or the record kind bypasses the cache.
    WritesDisabled,
}

/// What a prime did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimeOutcome {
    Skipped(SkipReason),
    /// Entries were offered to the backend. A flag is false when an
    /// insert-only write found a live entry, the write failed, or (for the
    /// found count) the entry does not apply.
    Written { id_list: bool, found_count: bool },
}

impl PrimeOutcome {
    /// Whether anything reached the backend.
    pub fn stored_any(&self) -> bool {
        matches!(
            self,
            Self::Written { id_list: true, .. } | Self::Written { found_count: true, .. }
        )
    }
}

/// Store the ordered id list and, in the `Pending` state, the found count.
pub(crate) async fn write_entries<C: CacheBackend>(
    backend: &C,
    context: &QueryContext,
    ids: &[RecordId],
    found: Option<u64>,
    ttl: Duration,
    stats: &StatsRecorder,
) -> PrimeOutcome {
    let Some(namespace) = context.namespace().filter(|_| context.writes_enabled()) else {
        return PrimeOutcome::Skipped(SkipReason::WritesDisabled);
    };
    if ids.is_empty() {
        return PrimeOutcome::Skipped(SkipReason::EmptyResult);
    }

    let mode = context.write_mode();
    let fingerprint = context.fingerprint();

    let id_list = write_one(
        backend,
        mode,
        fingerprint.id_list_key(),
        &ids,
        namespace,
        ttl,
        stats,
    )
    .await;

    let found_count = match (context.found_count_state(), found) {
        (FoundCountState::Pending, Some(found)) => {
            write_one(
                backend,
                mode,
                &fingerprint.found_count_key(),
                &found,
                namespace,
                ttl,
                stats,
            )
            .await
        }
        _ => false,
    };

    tracing::debug!(
        fingerprint = %fingerprint,
        namespace = %namespace,
        mode = ?mode,
        ids = ids.len(),
        id_list,
        found_count,
        "Primed query cache"
    );

    PrimeOutcome::Written {
        id_list,
        found_count,
    }
}

async fn write_one<C, T>(
    backend: &C,
    mode: WriteMode,
    key: &str,
    value: &T,
    namespace: &Namespace,
    ttl: Duration,
    stats: &StatsRecorder,
) -> bool
where
    C: CacheBackend,
    T: Serialize + Sync,
{
    let result: QueryCacheResult<bool> = match mode {
        WriteMode::InsertOnly => backend.add(key, value, namespace, ttl).await,
        WriteMode::Overwrite => backend.set(key, value, namespace, ttl).await.map(|()| true),
    };

    match result {
        Ok(stored) => stored,
        Err(err) => {
            stats.backend_error();
            tracing::warn!(
                key,
                namespace = %namespace,
                error = %err,
                "Cache write failed, entry not stored"
            );
            false
        }
    }
}

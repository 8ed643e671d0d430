//! QueryCache Storage - Read-through cache for list query results
//!
//! Caches the ordered id list and total match count of a query separately
//! from the records themselves, and invalidates by moving every reader to a
//! new generation namespace instead of deleting entries.
//!
//! The backends consumed by the cache are traits in [`backend`]; in-memory
//! and LMDB implementations are provided.

pub mod backend;
pub mod collate;
pub mod context;
pub mod generation;
pub mod invalidation;
pub mod query_cache;
pub mod resolver;
pub mod stats;
pub mod write_back;

pub use backend::{
    BackendStats, CacheBackend, GenerationCounter, InMemoryCacheBackend, InMemoryRecordStore,
    LmdbCacheBackend, LmdbCacheError, QuerySource, RecordStore, SourceRows,
};
pub use collate::{collate, IdOrder};
pub use context::{FoundCountLookup, IdListLookup, QueryContext};
pub use generation::{Bump, GenerationStore};
pub use invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationScope};
pub use query_cache::{QueryCache, QueryResult};
pub use resolver::{Outcome, ReducedFetch, Resolution, ResolutionKind};
pub use stats::QueryCacheStats;
pub use write_back::{PrimeOutcome, SkipReason};

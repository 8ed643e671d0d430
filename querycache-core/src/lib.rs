//! QueryCache Core - Protocol Types
//!
//! Pure data types shared by the cache layer: fingerprints, generations and
//! namespaces, query options, the found-count state machine, configuration
//! and the error taxonomy. No I/O lives here.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod namespace;
pub mod query;

pub use config::{
    QueryCacheConfig, DEFAULT_DOMAIN, DEFAULT_ENTRY_TTL_SECS, DEFAULT_GROUP_PREFIX,
    DEFAULT_MAX_GENERATION_DIGITS, MAX_ENTRY_TTL_SECS,
};
pub use error::{CacheError, ConfigError, QueryCacheError, QueryCacheResult, SourceError};
pub use fingerprint::QueryFingerprint;
pub use namespace::{Generation, Namespace};
pub use query::{
    CacheableRecord, FoundCountState, QueryOptions, QueryRequest, RecordId, WriteMode,
};

//! Error types for QueryCache operations

use thiserror::Error;

/// Cache layer errors.
///
/// None of these are fatal for a query: the resolver treats every backend
/// failure as "absent" and degrades to uncached behavior.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Record store unavailable: {reason}")]
    RecordStoreUnavailable { reason: String },

    #[error("Failed to encode cache value for key {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode cache value for key {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Generation counter unavailable for domain {domain}: {reason}")]
    CounterUnavailable { domain: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Errors raised by the source of truth the caller queries on a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Fetch by id failed for {count} records: {reason}")]
    FetchFailed { count: usize, reason: String },
}

/// Master error type for all QueryCache errors.
#[derive(Debug, Clone, Error)]
pub enum QueryCacheError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl QueryCacheError {
    /// Whether this error came from the cache layer rather than the source of truth.
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, Self::Cache(_))
    }
}

/// Result type alias for QueryCache operations.
pub type QueryCacheResult<T> = Result<T, QueryCacheError>;

// =============================================================================
// TESTS
// =============================================================================

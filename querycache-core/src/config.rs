//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default cache domain name. Also the generation counter key.
pub const DEFAULT_DOMAIN: &str = "querycache";

/// Default prefix for generation-qualified namespaces.
pub const DEFAULT_GROUP_PREFIX: &str = "querycache_";

/// Default TTL applied to ID-list and found-count entries (1 hour).
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 3600;

/// Longest accepted entry TTL (10 years).
pub const MAX_ENTRY_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Generation values longer than this many decimal digits reset to zero.
pub const DEFAULT_MAX_GENERATION_DIGITS: usize = 10;

/// Configuration for one cache domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Cache domain. Names the generation counter.
    pub domain: String,
    /// Prefix of every namespace, followed by the generation number.
    pub group_prefix: String,
    /// TTL for cached entries, in seconds.
    pub entry_ttl_secs: u64,
    /// Digit count above which a bumped generation resets to zero.
    pub max_generation_digits: usize,
    /// Record kinds that are never cached.
    pub bypass_kinds: Vec<String>,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            entry_ttl_secs: DEFAULT_ENTRY_TTL_SECS,
            max_generation_digits: DEFAULT_MAX_GENERATION_DIGITS,
            bypass_kinds: Vec::new(),
        }
    }
}

impl QueryCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the cache domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the namespace prefix.
    pub fn with_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = prefix.into();
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the overflow threshold for generation numbers.
    pub fn with_max_generation_digits(mut self, digits: usize) -> Self {
        self.max_generation_digits = digits;
        self
    }

    /// Never cache queries for the given record kind.
    pub fn with_bypass_kind(mut self, kind: impl Into<String>) -> Self {
        self.bypass_kinds.push(kind.into());
        self
    }

    /// TTL for cached entries.
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    /// Whether queries over `kind` skip the cache entirely.
    pub fn bypasses(&self, kind: Option<&str>) -> bool {
        match kind {
            Some(kind) => self.bypass_kinds.iter().any(|k| k == kind),
            None => false,
        }
    }

    /// Check that the config can drive a cache.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "domain".to_string(),
            });
        }
        if self.group_prefix.is_empty() {
            return Err(ConfigError::MissingField {
                field: "group_prefix".to_string(),
            });
        }
        if self.entry_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "entry_ttl_secs".to_string(),
                value: self.entry_ttl_secs.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.entry_ttl_secs > MAX_ENTRY_TTL_SECS {
            return Err(ConfigError::InvalidValue {
                field: "entry_ttl_secs".to_string(),
                value: self.entry_ttl_secs.to_string(),
                reason: format!("must be at most {MAX_ENTRY_TTL_SECS}"),
            });
        }
        // i64::MAX has 19 digits; the counter must be able to exceed the limit.
        if self.max_generation_digits == 0 || self.max_generation_digits > 18 {
            return Err(ConfigError::InvalidValue {
                field: "max_generation_digits".to_string(),
                value: self.max_generation_digits.to_string(),
                reason: "must be between 1 and 18".to_string(),
            });
        }
        Ok(())
    }
}

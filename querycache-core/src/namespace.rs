//! Generations and the namespaces derived from them.
//!
//! Invalidation never deletes entries. Bumping the generation moves every
//! reader to a fresh namespace and the old one is simply abandoned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of a domain's generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub i64);

impl Generation {
    /// The value a counter resets to on overflow.
    pub const ZERO: Generation = Generation(0);

    /// Seed for a counter that does not exist yet.
    ///
    /// Uses the current Unix time so a restarted process does not land on a
    /// namespace an earlier incarnation already filled.
    pub fn seed() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Number of characters in the decimal representation.
    pub fn decimal_len(&self) -> usize {
        self.0.to_string().len()
    }

    /// Whether this value has grown past the configured digit limit.
    pub fn exceeds_digits(&self, max_digits: usize) -> bool {
        self.decimal_len() > max_digits
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation-qualified key prefix for cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    name: String,
    generation: Generation,
}

impl Namespace {
    pub fn new(prefix: &str, generation: Generation) -> Self {
        Self {
            name: format!("{}{}", prefix, generation),
            generation,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_name() {
        let ns = Namespace::new("querycache_", Generation(1_700_000_000));
        assert_eq!(ns.as_str(), "querycache_1700000000");
        assert_eq!(ns.generation(), Generation(1_700_000_000));
    }

    #[test]
    fn test_distinct_generations_distinct_namespaces() {
        let a = Namespace::new("querycache_", Generation(41));
        let b = Namespace::new("querycache_", Generation(42));
        assert_ne!(a, b);
    }

    #[test]
    fn test_exceeds_digits() {
        assert!(!Generation(9_999_999_999).exceeds_digits(10));
        assert!(Generation(10_000_000_000).exceeds_digits(10));
        assert!(!Generation::ZERO.exceeds_digits(1));
    }

    #[test]
    fn test_seed_is_wall_clock() {
        let seed = Generation::seed();
        // Anything after 2020-01-01
        assert!(seed.value() > 1_577_836_800);
        assert_eq!(seed.decimal_len(), 10);
    }
}

//! Generation store for namespace-based invalidation.
//!
//! Each cache domain owns one counter in the backend. The current namespace is
//! the domain's prefix followed by the counter value; bumping the counter moves
//! every reader to a new, empty namespace.

use std::sync::Arc;

use querycache_core::{Generation, Namespace, QueryCacheConfig, QueryCacheResult};

use crate::backend::GenerationCounter;

/// Result of a successful bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bump {
    /// Generation now in effect.
    pub generation: Generation,
    /// Whether the counter overflowed and was reset to zero.
    pub overflowed: bool,
}

/// Produces namespaces for one cache domain.
///
/// Readers may observe any generation at least as new as the one in effect
/// when their query started, never an older one, except across an overflow
/// reset.
pub struct GenerationStore<G: GenerationCounter> {
    counter: Arc<G>,
    domain: String,
    group_prefix: String,
    max_digits: usize,
}

impl<G: GenerationCounter> GenerationStore<G> {
    /// Create a store for the domain named in `config`.
    pub fn new(counter: Arc<G>, config: &QueryCacheConfig) -> Self {
        Self {
            counter,
            domain: config.domain.clone(),
            group_prefix: config.group_prefix.clone(),
            max_digits: config.max_generation_digits,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get a reference to the counter backend.
    pub fn counter(&self) -> &G {
        &self.counter
    }

    /// Namespace for an explicit generation.
    pub fn namespace_for(&self, generation: Generation) -> Namespace {
        Namespace::new(&self.group_prefix, generation)
    }

    /// Read the current generation, seeding the counter on first use.
    pub async fn current_generation(&self) -> QueryCacheResult<Generation> {
        match self.counter.read(&self.domain).await? {
            Some(value) => Ok(Generation(value)),
            None => self.seed().await,
        }
    }

    /// Namespace for the current generation.
    pub async fn current_namespace(&self) -> QueryCacheResult<Namespace> {
        let generation = self.current_generation().await?;
        Ok(self.namespace_for(generation))
    }

    /// Atomically advance the generation.
    ///
    /// Once the new value has more than `max_generation_digits` decimal
    /// digits the counter is reset to zero instead.
    pub async fn bump(&self) -> QueryCacheResult<Bump> {
        let generation = match self.counter.increment(&self.domain).await? {
            Some(value) => Generation(value),
            // Nothing to advance from; a fresh seed is already a new namespace
            None => self.seed().await?,
        };

        if generation.exceeds_digits(self.max_digits) {
            self.counter.init(&self.domain, Generation::ZERO.value()).await?;
            tracing::info!(
                domain = %self.domain,
                overflowed_at = %generation,
                "Generation counter overflowed, reset to zero"
            );
            return Ok(Bump {
                generation: Generation::ZERO,
                overflowed: true,
            });
        }

        tracing::debug!(domain = %self.domain, generation = %generation, "Generation bumped");
        Ok(Bump {
            generation,
            overflowed: false,
        })
    }

    /// Seed the counter from the clock. A counter created concurrently by
    /// another reader wins, so a seed never moves the generation backwards.
    async fn seed(&self) -> QueryCacheResult<Generation> {
        let seed = Generation::seed();
        let current = self
            .counter
            .init_if_absent(&self.domain, seed.value())
            .await?;
        let generation = Generation(current);
        if generation == seed {
            tracing::info!(domain = %self.domain, generation = %seed, "Generation counter seeded");
        }
        Ok(generation)
    }
}

impl<G: GenerationCounter> Clone for GenerationStore<G> {
    fn clone(&self) -> Self {
        Self {
            counter: Arc::clone(&self.counter),
            domain: self.domain.clone(),
            group_prefix: self.group_prefix.clone(),
            max_digits: self.max_digits,
        }
    }
}

//! Query fingerprints.
//!
//! A fingerprint is the SHA-256 of the canonical query text, hex encoded.
//! It is the key root for both entries a query owns within a namespace.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::query::QueryRequest;

/// Suffix distinguishing the found-count key from the ID-list key.
const FOUND_SUFFIX: &str = "_found";

/// Deterministic identifier of a query's cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprint a request. The record kind, when present, is hashed in so
    /// identical text over different kinds never shares entries.
    pub fn of(request: &QueryRequest) -> Self {
        Self::compute(request.kind.as_deref(), &request.representation)
    }

    /// Fingerprint bare query text with no kind scoping.
    pub fn from_representation(representation: &str) -> Self {
        Self::compute(None, representation)
    }

    fn compute(kind: Option<&str>, representation: &str) -> Self {
        let mut hasher = Sha256::new();
        match kind {
            Some(kind) => {
                hasher.update([1u8]);
                hasher.update((kind.len() as u64).to_le_bytes());
                hasher.update(kind.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(representation.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Key of the ID-list entry.
    pub fn id_list_key(&self) -> &str {
        &self.0
    }

    /// Key of the found-count entry.
    pub fn found_count_key(&self) -> String {
        format!("{}{}", self.0, FOUND_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

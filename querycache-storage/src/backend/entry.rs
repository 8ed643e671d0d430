//! Stored entry format shared by the reference backends.
//!
//! Format: `[expires_at millis: 8 bytes LE][json value]`. An expiry of 0
//! means the entry never expires.

use std::time::Duration;

use chrono::{DateTime, Utc};
use querycache_core::{CacheError, QueryCacheResult};
use serde::{de::DeserializeOwned, Serialize};

const HEADER_LEN: usize = 8;
const NO_EXPIRY: i64 = 0;

/// Serialize a value together with its expiry.
pub(crate) fn encode<T: Serialize + ?Sized>(
    key: &str,
    value: &T,
    ttl: Duration,
    now: DateTime<Utc>,
) -> QueryCacheResult<Vec<u8>> {
    let expires_at = if ttl.is_zero() {
        NO_EXPIRY
    } else {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        now.checked_add_signed(ttl)
            .ok_or_else(|| CacheError::Encode {
                key: key.to_string(),
                reason: format!("expiry out of range for ttl {}s", ttl.num_seconds()),
            })?
            .timestamp_millis()
    };

    let value_bytes = serde_json::to_vec(value).map_err(|e| CacheError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(&value_bytes);
    Ok(bytes)
}

/// Whether the stored bytes are past their expiry (or unreadable).
pub(crate) fn is_expired(bytes: &[u8], now: DateTime<Utc>) -> bool {
    match expires_at(bytes) {
        Some(NO_EXPIRY) => false,
        Some(millis) => millis <= now.timestamp_millis(),
        None => true,
    }
}

/// Decode the value of a live entry.
pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> QueryCacheResult<T> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::Decode {
            key: key.to_string(),
            reason: "entry shorter than header".to_string(),
        }
        .into());
    }
    serde_json::from_slice(&bytes[HEADER_LEN..]).map_err(|e| {
        CacheError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn expires_at(bytes: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = bytes.get(0..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

//! Cache Store
//!
//! Generic keyed storage with per-entry TTL, backing both short-lived
//! intermediate artifacts and permanent computed artifacts. The same store
//! also holds task-lock records and subject active sets, so every backend
//! exposes `compare_and_swap` as the single atomic conditional-write
//! primitive; all task-record and active-set mutation routes through it.

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::SledStore;

use crate::error::StoreError;
use crate::types::ArtifactKey;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix under which cached artifact entries live.
const ARTIFACT_NAMESPACE: &str = "artifact:";

/// A stored record: payload bytes plus expiry metadata.
///
/// This is the wire format shared by every backend (bincode-encoded).
/// Records past their expiry read as absent; removal is lazy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub payload: Vec<u8>,
    /// Unix millis after which the record reads as absent. None = no expiry.
    pub expires_at_ms: Option<i64>,
}

impl StoredValue {
    pub fn new(payload: Vec<u8>, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        let expires_at_ms = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now.timestamp_millis().saturating_add(ttl_ms)
        });
        StoredValue {
            payload,
            expires_at_ms,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at_ms {
            Some(expires_at_ms) => now.timestamp_millis() >= expires_at_ms,
            None => false,
        }
    }
}

/// Keyed storage with per-entry TTL and one atomic conditional-write
/// primitive.
///
/// Multi-instance deployments must back this with shared storage; dedup and
/// rate-limit correctness depend on `compare_and_swap` being a single
/// indivisible operation against that storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the record for `key`. Expired records read as `None`.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Unconditional last-writer-wins write.
    async fn put(&self, key: &str, value: StoredValue) -> Result<(), StoreError>;

    /// Idempotent delete; removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic conditional write: applies `new` iff the current live record
    /// equals `expected` (`None` = key absent or expired). Returns whether
    /// the swap applied. Passing `new: None` deletes conditionally.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&StoredValue>,
        new: Option<StoredValue>,
    ) -> Result<bool, StoreError>;

    /// Delete every key beginning with `prefix`.
    async fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError>;
}

/// Disabled backend: reads always miss, writes trivially succeed, and
/// conditional writes never apply.
///
/// Conditional writes reporting "not applied" makes lock acquisition fail
/// closed, so no background work is ever scheduled while caching is off and
/// callers run unmodified.
#[derive(Debug, Default)]
pub struct DisabledStore;

#[async_trait]
impl KeyValueStore for DisabledStore {
    async fn get(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: StoredValue) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&StoredValue>,
        _new: Option<StoredValue>,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn clear_prefix(&self, _prefix: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Serialized artifact record.
///
/// The opaque payload is kept as a JSON string because artifact payloads are
/// self-describing documents; the envelope stays bincode like every other
/// record in the store.
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactRecord {
    value_json: String,
    created_at_ms: i64,
}

/// A cached artifact entry as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Typed facade over a [`KeyValueStore`] for artifact entries.
///
/// `set` is last-writer-wins per key, with one exception: a write carrying a
/// `created_at` older than the stored entry's is refused, so an entry's
/// timestamp never moves backwards.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        CacheStore { store }
    }

    /// A store where every operation is a no-op.
    pub fn disabled() -> Self {
        CacheStore {
            store: Arc::new(DisabledStore),
        }
    }

    pub fn backing(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub async fn get(&self, key: &ArtifactKey) -> Result<Option<CacheEntry>, StoreError> {
        let raw = self.store.get(&key.artifact_storage_key()).await?;
        Ok(raw.and_then(|value| decode_entry(&value)))
    }

    /// Store an artifact. Refuses to move `created_at` backwards; the stale
    /// write is dropped silently because the newer entry is already the
    /// right answer.
    pub async fn set(
        &self,
        key: &ArtifactKey,
        value: &serde_json::Value,
        created_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let record = ArtifactRecord {
            value_json: serde_json::to_string(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            created_at_ms: created_at.timestamp_millis(),
        };
        let payload =
            bincode::serialize(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let storage_key = key.artifact_storage_key();

        // The check-then-write window here is narrow and bounded by the lock
        // TTL; last-writer-wins covers everything the check does not.
        if let Some(current) = self
            .store
            .get(&storage_key)
            .await?
            .and_then(|value| decode_entry(&value))
        {
            if current.created_at.timestamp_millis() > record.created_at_ms {
                debug!(
                    key = %key,
                    stored_at = %current.created_at,
                    incoming_at = %created_at,
                    "Dropping artifact write older than stored entry"
                );
                return Ok(());
            }
        }

        let value = StoredValue::new(payload, ttl, Utc::now());
        self.store.put(&storage_key, value).await
    }

    /// Explicit invalidation; removing an absent entry is not an error.
    pub async fn delete(&self, key: &ArtifactKey) -> Result<(), StoreError> {
        self.store.delete(&key.artifact_storage_key()).await
    }

    /// Drop every cached artifact entry.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_prefix(ARTIFACT_NAMESPACE).await
    }
}

fn decode_entry(value: &StoredValue) -> Option<CacheEntry> {
    let record: ArtifactRecord = bincode::deserialize(&value.payload).ok()?;
    let created_at = Utc.timestamp_millis_opt(record.created_at_ms).single()?;
    let value = serde_json::from_str(&record.value_json).ok()?;
    Some(CacheEntry { value, created_at })
}

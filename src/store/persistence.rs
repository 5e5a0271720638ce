//! Persistence layer for the backing store

use crate::error::StoreError;
use crate::store::{KeyValueStore, StoredValue};
use async_trait::async_trait;
use chrono::Utc;
use sled;
use std::path::Path;

/// Sled-based implementation of [`KeyValueStore`].
///
/// Records are bincode-encoded [`StoredValue`]s. Sled has no native TTL, so
/// expiry lives inside the record: expired records read as absent and are
/// reclaimed lazily. Conditional writes map onto `sled::Db::compare_and_swap`
/// with a bounded retry that steps over physically-present-but-expired
/// records.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Maximum compare-and-swap retries before reporting "not applied".
    const CAS_ATTEMPTS: usize = 8;

    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Unavailable(format!("failed to open sled database: {}", e)))?;
        Ok(Self { db })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend_error)?;
        Ok(())
    }

    fn read_raw(&self, key: &str) -> Result<Option<sled::IVec>, StoreError> {
        self.db.get(key.as_bytes()).map_err(backend_error)
    }
}

fn backend_error(err: sled::Error) -> StoreError {
    StoreError::Unavailable(format!("sled backend error: {}", err))
}

fn encode(value: &StoredValue) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Option<StoredValue> {
    bincode::deserialize(bytes).ok()
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let now = Utc::now();
        let Some(raw) = self.read_raw(key)? else {
            return Ok(None);
        };

        match decode(&raw) {
            Some(value) if value.is_expired(now) => {
                // Reclaim lazily; losing this race just leaves the record for
                // the next reader.
                let _ = self
                    .db
                    .compare_and_swap(key.as_bytes(), Some(&raw), None as Option<&[u8]>);
                Ok(None)
            }
            Some(value) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let bytes = encode(&value)?;
        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key.as_bytes()).map_err(backend_error)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&StoredValue>,
        new: Option<StoredValue>,
    ) -> Result<bool, StoreError> {
        let new_bytes = match new {
            Some(ref value) => Some(encode(value)?),
            None => None,
        };

        for _ in 0..Self::CAS_ATTEMPTS {
            let now = Utc::now();
            let current_raw = self.read_raw(key)?;
            let current_live = current_raw
                .as_ref()
                .and_then(|raw| decode(raw))
                .filter(|value| !value.is_expired(now));

            let matches = match (expected, &current_live) {
                (None, None) => true,
                (Some(expected), Some(current)) => *expected == *current,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }

            // Swap against the physical bytes, which may be an expired record
            // the live view ignored. A mismatch means another writer raced us
            // between read and swap; re-read and retry.
            let swap = self
                .db
                .compare_and_swap(key.as_bytes(), current_raw.as_ref(), new_bytes.clone())
                .map_err(backend_error)?;
            if swap.is_ok() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<Result<_, _>>()
            .map_err(backend_error)?;

        for key in keys {
            self.db.remove(key).map_err(backend_error)?;
        }
        Ok(())
    }
}

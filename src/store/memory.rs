//! In-memory backing store
//!
//! Mutex-guarded map for tests and single-process deployments. Expired
//! records are reclaimed lazily on read. The simulated-outage switch lets
//! tests exercise the fail-closed paths without a real backend going away.

use crate::error::StoreError;
use crate::store::{KeyValueStore, StoredValue};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Simulate the backing store going away; all operations fail with
    /// `StoreError::Unavailable` until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "memory store simulated outage".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(value) => value.is_expired(now),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&StoredValue>,
        new: Option<StoredValue>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let mut entries = self.entries.lock();

        let current_live = entries.get(key).filter(|value| !value.is_expired(now));
        let matches = match (expected, current_live) {
            (None, None) => true,
            (Some(expected), Some(current)) => expected == current,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }

        match new {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(true)
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.lock().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

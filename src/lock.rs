//! Distributed Task Lock
//!
//! TTL-bound "acquire-if-absent" records that deduplicate in-flight
//! regeneration per artifact key. Acquisition is a single conditional write
//! against the backing store, so two callers racing for the same key cannot
//! both succeed. Records self-expire via TTL, guaranteeing forward progress
//! when a holder crashes without releasing.

use crate::store::{KeyValueStore, StoredValue};
use crate::types::ArtifactKey;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ephemeral marker of in-flight generation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub subject: String,
    pub started_at_ms: i64,
}

#[derive(Clone)]
pub struct TaskLock {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TaskLock {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        TaskLock { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Atomic set-if-absent. Returns false when another caller already holds
    /// the lock, or when the backing store is unreachable: skipping an
    /// opportunistic refresh beats risking unlocked duplicate execution, so
    /// store trouble fails closed.
    pub async fn acquire(&self, key: &ArtifactKey) -> bool {
        let now = Utc::now();
        let record = TaskRecord {
            subject: key.subject().to_string(),
            started_at_ms: now.timestamp_millis(),
        };
        let payload = match bincode::serialize(&record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to serialize task record");
                return false;
            }
        };
        let value = StoredValue::new(payload, Some(self.ttl), now);

        match self
            .store
            .compare_and_swap(&key.task_storage_key(), None, Some(value))
            .await
        {
            Ok(acquired) => {
                if acquired {
                    debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Acquired task lock");
                } else {
                    debug!(key = %key, "Task lock held elsewhere");
                }
                acquired
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Lock store unreachable, failing closed");
                false
            }
        }
    }

    /// Idempotent release; an already-expired or absent lock is not an error.
    pub async fn release(&self, key: &ArtifactKey) {
        if let Err(err) = self.store.delete(&key.task_storage_key()).await {
            // The TTL will reclaim the record; nothing more to do here.
            warn!(key = %key, error = %err, "Failed to release task lock");
        } else {
            debug!(key = %key, "Released task lock");
        }
    }

    /// Side-effect-free existence check for fast-path dedup.
    pub async fn is_active(&self, key: &ArtifactKey) -> bool {
        match self.store.get(&key.task_storage_key()).await {
            Ok(record) => record.is_some(),
            Err(err) => {
                debug!(key = %key, error = %err, "Lock store read failed during is_active");
                false
            }
        }
    }

    /// The record currently holding the lock, if any.
    pub async fn holder(&self, key: &ArtifactKey) -> Option<TaskRecord> {
        let value = self.store.get(&key.task_storage_key()).await.ok()??;
        bincode::deserialize(&value.payload).ok()
    }
}

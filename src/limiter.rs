//! Subject Rate Limiter
//!
//! Caps the number of simultaneously active regenerations per subject,
//! independent of scope parameters. Generation for one subject shares
//! upstream sub-resources (profile data, resource listings), so serializing
//! same-subject work raises the hit rate on those sub-resources and bounds
//! upstream call volume per subject. Different subjects never block each
//! other.
//!
//! The active set is a membership list in the backing store, mutated only
//! through compare-and-swap loops. Entries carry the task TTL so orphaned
//! memberships self-expire along with their task records.

use crate::store::{KeyValueStore, StoredValue};
use crate::types::{subject_active_set_key, ArtifactKey, SubjectId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SubjectLimiter {
    store: Arc<dyn KeyValueStore>,
    max_concurrent: usize,
    entry_ttl: Duration,
}

impl SubjectLimiter {
    /// Maximum conditional-write attempts before a membership update gives up.
    const CAS_ATTEMPTS: usize = 8;

    pub fn new(store: Arc<dyn KeyValueStore>, max_concurrent: usize, entry_ttl: Duration) -> Self {
        SubjectLimiter {
            store,
            max_concurrent,
            entry_ttl,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Task IDs currently active for this subject. A store failure reads as
    /// an empty set; the lock's fail-closed acquire is the real gate.
    pub async fn active_tasks(&self, subject: &SubjectId) -> Vec<String> {
        match self.store.get(&subject_active_set_key(subject)).await {
            Ok(Some(value)) => decode_members(&value),
            Ok(None) => Vec::new(),
            Err(err) => {
                debug!(subject = %subject, error = %err, "Active-set read failed");
                Vec::new()
            }
        }
    }

    /// True iff this subject is below its concurrency cap.
    pub async fn can_start(&self, subject: &SubjectId) -> bool {
        let active = self.active_tasks(subject).await;
        let can_start = active.len() < self.max_concurrent;
        if !can_start {
            info!(
                subject = %subject,
                active = active.len(),
                max = self.max_concurrent,
                "Subject concurrency cap reached"
            );
        }
        can_start
    }

    /// Add a task to the subject's active set (idempotent).
    pub async fn register(&self, subject: &SubjectId, key: &ArtifactKey) {
        self.update_members(subject, |members| {
            let task_id = key.to_string();
            if members.contains(&task_id) {
                false
            } else {
                members.push(task_id);
                true
            }
        })
        .await;
    }

    /// Remove a task from the subject's active set (idempotent).
    pub async fn unregister(&self, subject: &SubjectId, key: &ArtifactKey) {
        self.update_members(subject, |members| {
            let task_id = key.to_string();
            let before = members.len();
            members.retain(|member| member != &task_id);
            members.len() != before
        })
        .await;
    }

    /// Compare-and-swap loop over the serialized membership list. `mutate`
    /// returns whether it changed anything; unchanged sets skip the write.
    async fn update_members<F>(&self, subject: &SubjectId, mutate: F)
    where
        F: Fn(&mut Vec<String>) -> bool,
    {
        let set_key = subject_active_set_key(subject);

        for _ in 0..Self::CAS_ATTEMPTS {
            let current = match self.store.get(&set_key).await {
                Ok(current) => current,
                Err(err) => {
                    warn!(subject = %subject, error = %err, "Active-set read failed during update");
                    return;
                }
            };

            let mut members = current
                .as_ref()
                .map(|value| decode_members(value))
                .unwrap_or_default();
            if !mutate(&mut members) {
                return;
            }

            let new = if members.is_empty() {
                None
            } else {
                let payload = match bincode::serialize(&members) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(subject = %subject, error = %err, "Failed to serialize active set");
                        return;
                    }
                };
                Some(StoredValue::new(payload, Some(self.entry_ttl), Utc::now()))
            };

            match self
                .store
                .compare_and_swap(&set_key, current.as_ref(), new)
                .await
            {
                Ok(true) => {
                    debug!(subject = %subject, active = members.len(), "Updated subject active set");
                    return;
                }
                Ok(false) => continue,
                Err(err) => {
                    warn!(subject = %subject, error = %err, "Active-set update failed");
                    return;
                }
            }
        }

        warn!(subject = %subject, "Active-set update kept losing conditional-write races");
    }
}

fn decode_members(value: &StoredValue) -> Vec<String> {
    bincode::deserialize(&value.payload).unwrap_or_default()
}

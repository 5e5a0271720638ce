//! Integration tests for the subject rate limiter
//!
//! The cap binds per subject across differing scopes; distinct subjects never
//! block each other; orphaned memberships expire with the task TTL.

use recache::limiter::SubjectLimiter;
use recache::store::{KeyValueStore, MemoryStore, SledStore};
use recache::types::{ArtifactKey, Scope, SubjectId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

fn key_for(subject: &SubjectId, period: &str) -> ArtifactKey {
    ArtifactKey::derive(subject, &Scope::new().with("period", period))
}

#[tokio::test]
async fn test_cap_binds_across_scopes_on_sled() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(SledStore::open(temp_dir.path()).unwrap());
    let limiter = SubjectLimiter::new(store, 1, Duration::from_secs(300));
    let subject = SubjectId::new("octocat");

    limiter.register(&subject, &key_for(&subject, "1_year")).await;

    assert!(!limiter.can_start(&subject).await);
    assert!(limiter.can_start(&SubjectId::new("hubot")).await);

    limiter
        .unregister(&subject, &key_for(&subject, "1_year"))
        .await;
    assert!(limiter.can_start(&subject).await);
}

#[tokio::test]
async fn test_orphaned_membership_expires_with_ttl() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let limiter = SubjectLimiter::new(store, 1, Duration::from_millis(200));
    let subject = SubjectId::new("octocat");

    // Register without ever unregistering, as if the holder crashed.
    limiter.register(&subject, &key_for(&subject, "1_year")).await;
    assert!(!limiter.can_start(&subject).await);

    sleep(Duration::from_millis(350)).await;
    assert!(limiter.can_start(&subject).await);
    assert!(limiter.active_tasks(&subject).await.is_empty());
}

#[tokio::test]
async fn test_concurrent_registrations_converge() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let limiter = Arc::new(SubjectLimiter::new(store, 8, Duration::from_secs(300)));
    let subject = SubjectId::new("octocat");

    let periods = ["1_year", "2_years", "5_years", "all_time"];
    let mut handles = Vec::new();
    for period in periods {
        let limiter = Arc::clone(&limiter);
        let subject = subject.clone();
        handles.push(tokio::spawn(async move {
            limiter.register(&subject, &key_for(&subject, period)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every racing registration must land despite conditional-write contention.
    let active = limiter.active_tasks(&subject).await;
    assert_eq!(active.len(), periods.len());
}

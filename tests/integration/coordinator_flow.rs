//! Integration tests for the resolve decision flow
//!
//! Covers the serve/schedule scenarios end to end: missing and stale entries,
//! concurrent dedup, per-subject rate limiting, force refresh, and failure
//! isolation of background generation.

use crate::integration::test_utils::{build_coordinator, default_subject, scope, StubGenerator};
use chrono::Utc;
use recache::coordinator::{CoordinatorConfig, ResolveStatus};
use recache::error::GenerationError;
use recache::lock::TaskLock;
use recache::store::{CacheStore, KeyValueStore};
use recache::types::{ArtifactKey, SubjectId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn slow_config() -> CoordinatorConfig {
    CoordinatorConfig {
        stale_age: Duration::from_secs(86400),
        artifact_ttl: Some(Duration::from_secs(3600)),
        task_ttl: Duration::from_secs(300),
        max_concurrent_per_subject: 1,
    }
}

#[tokio::test]
async fn test_missing_key_serves_pending_then_fresh() {
    let generator = Arc::new(StubGenerator::new());
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");

    let first = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(first.status, ResolveStatus::PendingRefreshing);
    assert!(first.artifact.is_none());
    assert!(first.created_at.is_none());

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);

    let second = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(second.status, ResolveStatus::Fresh);
    assert_eq!(
        second.artifact.unwrap(),
        json!({"subject": "octocat", "sequence": 1})
    );
    assert!(second.created_at.is_some());
}

#[tokio::test]
async fn test_stale_entry_served_while_refreshing_once() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(150)));
    let (coordinator, store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");
    let key = ArtifactKey::derive(&subject, &scope);

    // Seed an entry 25 hours old against a 24 hour threshold.
    let stale_value = json!({"subject": "octocat", "sequence": 0});
    let stale_at = Utc::now() - chrono::Duration::hours(25);
    CacheStore::new(Arc::clone(&store) as Arc<dyn KeyValueStore>)
        .set(&key, &stale_value, stale_at, None)
        .await
        .unwrap();

    let first = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(first.status, ResolveStatus::StaleRefreshing);
    assert_eq!(first.artifact.unwrap(), stale_value);

    // A second call within the generation window dedupes on the task lock.
    let second = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(second.status, ResolveStatus::StaleRefreshing);
    assert_eq!(second.artifact.unwrap(), stale_value);

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);

    let third = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(third.status, ResolveStatus::Fresh);
    assert_eq!(
        third.artifact.unwrap(),
        json!({"subject": "octocat", "sequence": 1})
    );
}

#[tokio::test]
async fn test_concurrent_resolves_invoke_generation_at_most_once() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(100)));
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");

    let (a, b, c, d, e) = tokio::join!(
        coordinator.resolve(&subject, &scope, false),
        coordinator.resolve(&subject, &scope, false),
        coordinator.resolve(&subject, &scope, false),
        coordinator.resolve(&subject, &scope, false),
        coordinator.resolve(&subject, &scope, false),
    );

    for resolution in [a, b, c, d, e] {
        assert_eq!(resolution.status, ResolveStatus::PendingRefreshing);
    }

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_subject_cap_blocks_second_scope_until_first_completes() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(150)));
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope_a = scope("1_year");
    let scope_b = scope("2_years");

    let first = coordinator.resolve(&subject, &scope_a, false).await;
    assert_eq!(first.status, ResolveStatus::PendingRefreshing);

    // Same subject, different scope: the cap refuses a second task.
    let blocked = coordinator.resolve(&subject, &scope_b, false).await;
    assert_eq!(blocked.status, ResolveStatus::RateLimited);

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);

    // With the first task done, scope B can schedule.
    let unblocked = coordinator.resolve(&subject, &scope_b, false).await;
    assert_eq!(unblocked.status, ResolveStatus::PendingRefreshing);
    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_distinct_subjects_proceed_independently() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(100)));
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let scope = scope("1_year");

    let first = coordinator
        .resolve(&SubjectId::new("octocat"), &scope, false)
        .await;
    let second = coordinator
        .resolve(&SubjectId::new("hubot"), &scope, false)
        .await;

    assert_eq!(first.status, ResolveStatus::PendingRefreshing);
    assert_eq!(second.status, ResolveStatus::PendingRefreshing);

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_force_refresh_bypasses_fresh_but_dedupes() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(100)));
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");

    coordinator.resolve(&subject, &scope, false).await;
    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);

    // Entry is fresh; a plain resolve serves it without scheduling.
    let plain = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(plain.status, ResolveStatus::Fresh);

    // Two simultaneous forced requests still produce exactly one generation.
    let (a, b) = tokio::join!(
        coordinator.resolve(&subject, &scope, true),
        coordinator.resolve(&subject, &scope, true),
    );
    assert_eq!(a.status, ResolveStatus::StaleRefreshing);
    assert_eq!(b.status, ResolveStatus::StaleRefreshing);

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_failed_generation_leaves_entry_unchanged_and_releases_lock() {
    let generator = Arc::new(StubGenerator::new());
    let (coordinator, store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");
    let key = ArtifactKey::derive(&subject, &scope);

    let stale_value = json!({"subject": "octocat", "rows": [1, 2, 3]});
    let stale_at = Utc::now() - chrono::Duration::hours(25);
    let cache = CacheStore::new(Arc::clone(&store) as Arc<dyn KeyValueStore>);
    cache.set(&key, &stale_value, stale_at, None).await.unwrap();

    generator.push_outcome(Err(GenerationError::Terminal(
        "authorization rejected".into(),
    )));

    let served = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(served.status, ResolveStatus::StaleRefreshing);

    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);

    // The prior entry is untouched, timestamp included.
    let entry = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(entry.value, stale_value);
    assert_eq!(
        entry.created_at.timestamp_millis(),
        stale_at.timestamp_millis()
    );

    // The lock is released immediately after the failure.
    let lock = TaskLock::new(
        Arc::clone(&store) as Arc<dyn KeyValueStore>,
        Duration::from_secs(300),
    );
    assert!(!lock.is_active(&key).await);

    // A later resolve may schedule again; stale data stayed authoritative.
    let retry = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(retry.status, ResolveStatus::StaleRefreshing);
    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 2);

    let stats = coordinator.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn test_store_outage_degrades_to_miss_and_fails_closed() {
    let generator = Arc::new(StubGenerator::new());
    let (coordinator, store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope = scope("1_year");

    store.set_unavailable(true);

    // No hard error reaches the caller, and the lock's fail-closed acquire
    // prevents any unlocked background execution.
    let resolution = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(resolution.status, ResolveStatus::PendingRefreshing);
    assert!(resolution.artifact.is_none());

    assert!(coordinator.wait_for_idle(Duration::from_secs(1)).await);
    assert_eq!(generator.calls(), 0);

    // Once the store is back, the next resolve schedules normally.
    store.set_unavailable(false);
    let resolution = coordinator.resolve(&subject, &scope, false).await;
    assert_eq!(resolution.status, ResolveStatus::PendingRefreshing);
    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_stats_track_decision_branches() {
    let generator = Arc::new(StubGenerator::with_delay(Duration::from_millis(100)));
    let (coordinator, _store) = build_coordinator(Arc::clone(&generator), slow_config());
    let subject = default_subject();
    let scope_a = scope("1_year");
    let scope_b = scope("2_years");

    coordinator.resolve(&subject, &scope_a, false).await; // scheduled
    coordinator.resolve(&subject, &scope_a, false).await; // deduplicated
    coordinator.resolve(&subject, &scope_b, false).await; // rate limited
    assert!(coordinator.wait_for_idle(Duration::from_secs(5)).await);
    coordinator.resolve(&subject, &scope_a, false).await; // fresh

    let stats = coordinator.stats();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.deduplicated, 1);
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.served_fresh, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.in_flight, 0);
}

//! Background Task Coordinator
//!
//! Orchestrates the resolve decision flow: evaluate freshness, dedupe via the
//! task lock, enforce the per-subject cap, schedule asynchronous generation,
//! and commit results into the cache. Callers always get the best-available
//! artifact immediately; generation runs after the response is returned and
//! its failures are observable only through logs and continued staleness.

use crate::error::StoreError;
use crate::generation::{ArtifactGenerator, GenerationPipeline, PipelineConfig};
use crate::limiter::SubjectLimiter;
use crate::lock::TaskLock;
use crate::staleness::{classify, ArtifactClass, Freshness};
use crate::store::{CacheEntry, CacheStore, KeyValueStore};
use crate::types::{ArtifactKey, Scope, SubjectId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Status flag accompanying every resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    /// Cached entry served as-is; no lock interaction.
    Fresh,
    /// Stale entry served while regeneration is in flight.
    StaleRefreshing,
    /// No entry yet; regeneration is in flight.
    PendingRefreshing,
    /// Subject concurrency cap reached; nothing scheduled.
    RateLimited,
}

impl ResolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveStatus::Fresh => "fresh",
            ResolveStatus::StaleRefreshing => "stale_refreshing",
            ResolveStatus::PendingRefreshing => "pending_refreshing",
            ResolveStatus::RateLimited => "rate_limited",
        }
    }
}

/// Outcome of a resolve call: best-available artifact plus status.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub artifact: Option<serde_json::Value>,
    pub status: ResolveStatus,
    pub created_at: Option<DateTime<Utc>>,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Age at and beyond which an entry classifies as stale.
    pub stale_age: Duration,
    /// Cache TTL for committed artifacts. None = permanent class: entries
    /// never age out and refresh only through the force override.
    pub artifact_ttl: Option<Duration>,
    /// Task-record TTL; reclaims orphaned locks and active-set slots.
    pub task_ttl: Duration,
    /// Concurrency cap per subject.
    pub max_concurrent_per_subject: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stale_age: Duration::from_secs(86400),
            artifact_ttl: Some(Duration::from_secs(3600)),
            task_ttl: Duration::from_secs(300),
            max_concurrent_per_subject: 1,
        }
    }
}

impl CoordinatorConfig {
    pub fn artifact_class(&self) -> ArtifactClass {
        if self.artifact_ttl.is_some() {
            ArtifactClass::Intermediate
        } else {
            ArtifactClass::Permanent
        }
    }
}

/// Coordinator counters.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Resolutions served from a fresh entry.
    pub served_fresh: usize,
    /// Background generations scheduled.
    pub scheduled: usize,
    /// Resolutions that found regeneration already in flight.
    pub deduplicated: usize,
    /// Resolutions refused by the subject cap.
    pub rate_limited: usize,
    /// Generations committed to the cache.
    pub completed: usize,
    /// Generations that failed (cache left untouched).
    pub failed: usize,
    /// Generations currently running.
    pub in_flight: usize,
}

pub struct Coordinator {
    cache: CacheStore,
    lock: TaskLock,
    limiter: SubjectLimiter,
    pipeline: Arc<GenerationPipeline>,
    config: CoordinatorConfig,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn ArtifactGenerator>,
        config: CoordinatorConfig,
        pipeline_config: PipelineConfig,
    ) -> Self {
        let cache = CacheStore::new(Arc::clone(&store));
        let lock = TaskLock::new(Arc::clone(&store), config.task_ttl);
        let limiter =
            SubjectLimiter::new(store, config.max_concurrent_per_subject, config.task_ttl);
        let pipeline = Arc::new(GenerationPipeline::new(generator, pipeline_config));

        Coordinator {
            cache,
            lock,
            limiter,
            pipeline,
            config,
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
        }
    }

    /// Resolve an artifact for a subject + scope pair.
    ///
    /// Never produces a hard error: backing-store trouble degrades to a cache
    /// miss, and generation failures stay in the background. `force` treats a
    /// fresh entry as stale but still goes through dedup and rate limiting,
    /// so two simultaneous forced requests produce exactly one generation.
    pub async fn resolve(&self, subject: &SubjectId, scope: &Scope, force: bool) -> Resolution {
        let key = ArtifactKey::derive(subject, scope);
        let now = Utc::now();

        let entry = match self.cache.get(&key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "Cache read failed, treating as miss");
                None
            }
        };

        let mut freshness = classify(
            entry.as_ref(),
            now,
            self.config.stale_age,
            self.config.artifact_class(),
        );
        if force && freshness == Freshness::Fresh {
            debug!(key = %key, "Force refresh overrides fresh classification");
            freshness = Freshness::Stale;
        }

        if freshness == Freshness::Fresh {
            self.stats.write().served_fresh += 1;
            return resolution(entry, ResolveStatus::Fresh);
        }

        // Fast-path dedupe: regeneration for this key is already in flight.
        if self.lock.is_active(&key).await {
            debug!(key = %key, "Regeneration already in flight, serving current value");
            self.stats.write().deduplicated += 1;
            return refreshing_resolution(entry);
        }

        if !self.limiter.can_start(subject).await {
            self.stats.write().rate_limited += 1;
            return resolution(entry, ResolveStatus::RateLimited);
        }

        if !self.lock.acquire(&key).await {
            // Lost the acquire race; another caller just scheduled this work.
            debug!(key = %key, "Lost lock race, serving current value");
            self.stats.write().deduplicated += 1;
            return refreshing_resolution(entry);
        }

        self.limiter.register(subject, &key).await;

        // Count the task as in flight before it can possibly finish.
        {
            let mut stats = self.stats.write();
            stats.scheduled += 1;
            stats.in_flight += 1;
        }
        self.spawn_generation(key.clone(), subject.clone(), scope.clone());
        let result = refreshing_resolution(entry);
        info!(
            key = %key,
            subject = %subject,
            scope = %scope,
            status = result.status.as_str(),
            force,
            "Scheduled background regeneration"
        );
        result
    }

    /// Explicitly invalidate a cached artifact (the refresh path for
    /// permanent-class entries).
    pub async fn invalidate(&self, subject: &SubjectId, scope: &Scope) -> Result<(), StoreError> {
        let key = ArtifactKey::derive(subject, scope);
        info!(key = %key, "Invalidating cached artifact");
        self.cache.delete(&key).await
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    /// Wait until no scheduled generation is running. Returns false on
    /// timeout. Test and shutdown helper; request handling never waits.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.stats.read().in_flight == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Run the generation pipeline in a supervised background task.
    ///
    /// The pipeline executes in its own spawned task awaited through its
    /// JoinHandle, so even a panic in generation cannot skip the cleanup:
    /// the lock is released and the subject slot unregistered on every exit
    /// path. The triggering caller's response has already been returned.
    fn spawn_generation(&self, key: ArtifactKey, subject: SubjectId, scope: Scope) {
        let cache = self.cache.clone();
        let lock = self.lock.clone();
        let limiter = self.limiter.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let artifact_ttl = self.config.artifact_ttl;
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let supervised = {
                let pipeline = Arc::clone(&pipeline);
                let subject = subject.clone();
                let scope = scope.clone();
                tokio::spawn(async move { pipeline.run(&subject, &scope).await })
            };

            match supervised.await {
                Ok(Ok(value)) => {
                    let committed_at = Utc::now();
                    match cache.set(&key, &value, committed_at, artifact_ttl).await {
                        Ok(()) => {
                            stats.write().completed += 1;
                            info!(key = %key, subject = %subject, "Committed regenerated artifact");
                        }
                        Err(err) => {
                            stats.write().failed += 1;
                            error!(
                                key = %key,
                                subject = %subject,
                                error = %err,
                                "Failed to commit regenerated artifact"
                            );
                        }
                    }
                }
                Ok(Err(err)) => {
                    // Stale data stays authoritative; the waiting caller never
                    // sees this failure.
                    stats.write().failed += 1;
                    error!(
                        key = %key,
                        subject = %subject,
                        scope = %scope,
                        error = %err,
                        terminal = !err.is_transient(),
                        "Background generation failed"
                    );
                }
                Err(join_err) => {
                    stats.write().failed += 1;
                    error!(
                        key = %key,
                        subject = %subject,
                        error = %join_err,
                        "Background generation task aborted"
                    );
                }
            }

            lock.release(&key).await;
            limiter.unregister(&subject, &key).await;
            {
                let mut stats = stats.write();
                stats.in_flight = stats.in_flight.saturating_sub(1);
            }
        });
    }
}

fn resolution(entry: Option<CacheEntry>, status: ResolveStatus) -> Resolution {
    let (artifact, created_at) = match entry {
        Some(entry) => (Some(entry.value), Some(entry.created_at)),
        None => (None, None),
    };
    Resolution {
        artifact,
        status,
        created_at,
    }
}

/// Serve the current value while regeneration is (or just became) in flight.
fn refreshing_resolution(entry: Option<CacheEntry>) -> Resolution {
    let status = if entry.is_some() {
        ResolveStatus::StaleRefreshing
    } else {
        ResolveStatus::PendingRefreshing
    };
    resolution(entry, status)
}

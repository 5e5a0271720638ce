//! Staleness Evaluation
//!
//! Classifies a cache entry as fresh, stale, or missing given its age and a
//! threshold. Permanent-class artifacts are never aged out; their refresh is
//! driven only by an explicit override.

use crate::store::CacheEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Freshness classification of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

/// Artifact retention class.
///
/// Intermediate entries carry a TTL and age out; permanent entries live until
/// explicitly invalidated and never classify as stale by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactClass {
    Intermediate,
    Permanent,
}

/// Classify an entry against a staleness threshold.
///
/// The boundary is inclusive: an entry exactly `threshold` old is Stale.
pub fn classify(
    entry: Option<&CacheEntry>,
    now: DateTime<Utc>,
    threshold: Duration,
    class: ArtifactClass,
) -> Freshness {
    let Some(entry) = entry else {
        return Freshness::Missing;
    };

    if class == ArtifactClass::Permanent {
        return Freshness::Fresh;
    }

    let age_ms = now
        .signed_duration_since(entry.created_at)
        .num_milliseconds();
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);

    if age_ms >= threshold_ms {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Render an entry age for display ("34 seconds ago", "3 hours ago").
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

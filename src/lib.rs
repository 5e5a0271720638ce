//! Recache: report cache and background regeneration coordination
//!
//! Decides whether a cached computed artifact is fresh enough to serve,
//! atomically deduplicates concurrent regeneration per artifact key, caps
//! per-subject concurrency, and commits background-computed results into the
//! cache without races.

pub mod composition;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generation;
pub mod limiter;
pub mod lock;
pub mod logging;
pub mod staleness;
pub mod store;
pub mod types;

//! Error types for the report cache and regeneration coordinator.

use thiserror::Error;

/// Backing-store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unreachable. Callers treat this as a cache miss,
    /// never as an authoritative staleness signal; lock acquisition fails
    /// closed on it.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("record serialization failed: {0}")]
    Serialization(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generation pipeline errors
#[derive(Debug, Error, Clone)]
pub enum GenerationError {
    /// Upstream timeout or throttling; retried a bounded number of times
    /// inside the pipeline.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Authorization or permission rejection; aborts immediately, never
    /// retried.
    #[error("terminal generation failure: {0}")]
    Terminal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

//! Configuration System
//!
//! Layered configuration: an optional TOML file, then `RECACHE_`-prefixed
//! environment overrides, deserialized onto serde defaults and validated
//! before use.

use crate::coordinator::CoordinatorConfig;
use crate::error::ConfigError;
use crate::generation::PipelineConfig;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecacheConfig {
    /// Cache store settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend the shared store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

/// Cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global switch; when false every cache operation is a no-op and no
    /// background regeneration is ever scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backing store backend.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// On-disk path for the sled backend. Defaults to the platform data dir.
    #[serde(default)]
    pub sled_path: Option<PathBuf>,

    /// TTL in seconds for committed artifacts. None = permanent class
    /// (explicit invalidation only).
    #[serde(default = "default_artifact_ttl")]
    pub artifact_ttl_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_artifact_ttl() -> Option<u64> {
    Some(3600)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: default_backend(),
            sled_path: None,
            artifact_ttl_seconds: default_artifact_ttl(),
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Entry age in seconds at and beyond which it classifies as stale.
    #[serde(default = "default_stale_age")]
    pub stale_age_seconds: u64,

    /// Task-record TTL in seconds (lock and active-set reclamation).
    #[serde(default = "default_task_ttl")]
    pub task_ttl_seconds: u64,

    /// Concurrency cap per subject.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_subject: usize,

    /// Retry attempts for transient generation failures.
    #[serde(default = "default_retry_attempts")]
    pub max_retry_attempts: usize,

    /// Delay between generation retries (milliseconds).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_stale_age() -> u64 {
    86400
}

fn default_task_ttl() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    1
}

fn default_retry_attempts() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            stale_age_seconds: default_stale_age(),
            task_ttl_seconds: default_task_ttl(),
            max_concurrent_per_subject: default_max_concurrent(),
            max_retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RecacheConfig {
    /// Load configuration from an optional TOML file plus `RECACHE_`
    /// environment overrides (nested keys separated by `__`, e.g.
    /// `RECACHE_CACHE__ENABLED=false`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RECACHE")
                .separator("__")
                .try_parsing(true),
        );

        let loaded = builder.build()?;
        let parsed: RecacheConfig = loaded.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.coordinator.stale_age_seconds == 0 {
            errors.push("coordinator.stale_age_seconds must be greater than zero".to_string());
        }
        if self.coordinator.task_ttl_seconds == 0 {
            errors.push("coordinator.task_ttl_seconds must be greater than zero".to_string());
        }
        if self.coordinator.max_concurrent_per_subject == 0 {
            errors.push(
                "coordinator.max_concurrent_per_subject must be greater than zero".to_string(),
            );
        }
        if self.cache.artifact_ttl_seconds == Some(0) {
            errors.push("cache.artifact_ttl_seconds must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    /// Runtime coordinator configuration derived from the settings.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            stale_age: Duration::from_secs(self.coordinator.stale_age_seconds),
            artifact_ttl: self.cache.artifact_ttl_seconds.map(Duration::from_secs),
            task_ttl: Duration::from_secs(self.coordinator.task_ttl_seconds),
            max_concurrent_per_subject: self.coordinator.max_concurrent_per_subject,
        }
    }

    /// Runtime pipeline configuration derived from the settings.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_retry_attempts: self.coordinator.max_retry_attempts,
            retry_delay: Duration::from_millis(self.coordinator.retry_delay_ms),
        }
    }

    /// Resolved sled path: the configured one, or the platform data dir.
    pub fn sled_path(&self) -> PathBuf {
        if let Some(path) = &self.cache.sled_path {
            return path.clone();
        }
        default_sled_path()
    }
}

/// Default on-disk store location: `<platform data dir>/recache/store`.
pub fn default_sled_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "recache")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".recache/store"))
}

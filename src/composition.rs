//! Composition root: build a coordinator from configuration.

use crate::config::{RecacheConfig, StoreBackend};
use crate::coordinator::Coordinator;
use crate::error::ConfigError;
use crate::generation::ArtifactGenerator;
use crate::store::{DisabledStore, KeyValueStore, MemoryStore, SledStore};
use std::sync::Arc;
use tracing::info;

/// Build the shared backing store selected by the configuration.
///
/// With caching disabled this returns the no-op store, which also makes lock
/// acquisition fail closed so no background regeneration is ever scheduled.
pub fn build_store(config: &RecacheConfig) -> Result<Arc<dyn KeyValueStore>, ConfigError> {
    if !config.cache.enabled {
        info!("Caching disabled; store operations are no-ops");
        return Ok(Arc::new(DisabledStore));
    }

    match config.cache.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sled => {
            let path = config.sled_path();
            let store = SledStore::open(&path)
                .map_err(|e| ConfigError::Invalid(format!("cannot open store: {}", e)))?;
            info!(path = %path.display(), "Opened sled backing store");
            Ok(Arc::new(store))
        }
    }
}

/// Build a coordinator wired to the configured store and the given generator.
pub fn build_coordinator(
    config: &RecacheConfig,
    generator: Arc<dyn ArtifactGenerator>,
) -> Result<Coordinator, ConfigError> {
    config.validate()?;
    let store = build_store(config)?;
    Ok(Coordinator::new(
        store,
        generator,
        config.coordinator_config(),
        config.pipeline_config(),
    ))
}

//! Generation Pipeline
//!
//! Interface to the external artifact producer, plus the bounded retry
//! policy applied around it. Transient upstream failures (timeouts,
//! throttling) are retried here with a fixed delay; terminal failures
//! (authorization rejected) propagate immediately. The coordinator never
//! retries a scheduling pass on its own.

use crate::error::GenerationError;
use crate::types::{Scope, SubjectId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Produces an artifact for a subject + scope pair.
///
/// Implementations wrap the upstream data source (rate limiting, pagination,
/// authentication live there, not here).
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        subject: &SubjectId,
        scope: &Scope,
    ) -> Result<serde_json::Value, GenerationError>;
}

/// Retry policy for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum retry attempts after the initial call.
    pub max_retry_attempts: usize,
    /// Delay between retries.
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 2,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// A generator plus its retry budget.
pub struct GenerationPipeline {
    generator: Arc<dyn ArtifactGenerator>,
    config: PipelineConfig,
}

impl GenerationPipeline {
    pub fn new(generator: Arc<dyn ArtifactGenerator>, config: PipelineConfig) -> Self {
        GenerationPipeline { generator, config }
    }

    /// Run one generation, retrying transient failures up to the budget.
    pub async fn run(
        &self,
        subject: &SubjectId,
        scope: &Scope,
    ) -> Result<serde_json::Value, GenerationError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.generator.generate(subject, scope).await {
                Ok(value) => {
                    info!(
                        subject = %subject,
                        scope = %scope,
                        attempt = attempt + 1,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Generation completed"
                    );
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retry_attempts => {
                    attempt += 1;
                    warn!(
                        subject = %subject,
                        scope = %scope,
                        attempt,
                        max_attempts = self.config.max_retry_attempts,
                        error = %err,
                        "Transient generation failure, retrying"
                    );
                    sleep(self.config.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

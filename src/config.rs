//! # Configuration
//!
//! Environment-driven settings for the background-operations core: default
//! batching, retry budgets, and backoff shape. Operations accept explicit
//! [`BatchingOptions`] per start request; these defaults apply when a caller
//! does not supply them.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::BatchingOptions;
use crate::orchestration::{Backoff, LoopPolicies, RetryPolicy};

#[derive(Debug, Clone)]
pub struct OperationsConfig {
    pub database_url: String,
    pub default_batch_size: u64,
    pub default_max_parallel: usize,
    pub retry_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub operations_base_url: String,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/imaging_development".to_string(),
            default_batch_size: 100,
            default_max_parallel: 2,
            retry_max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            operations_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl OperationsConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            config.database_url = database_url;
        }

        if let Ok(batch_size) = std::env::var("IMAGING_OPS_BATCH_SIZE") {
            config.default_batch_size = batch_size.parse().map_err(|e| {
                Error::Configuration(format!("Invalid default_batch_size: {e}"))
            })?;
        }

        if let Ok(max_parallel) = std::env::var("IMAGING_OPS_MAX_PARALLEL") {
            config.default_max_parallel = max_parallel.parse().map_err(|e| {
                Error::Configuration(format!("Invalid default_max_parallel: {e}"))
            })?;
        }

        if let Ok(max_attempts) = std::env::var("IMAGING_OPS_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = max_attempts.parse().map_err(|e| {
                Error::Configuration(format!("Invalid retry_max_attempts: {e}"))
            })?;
        }

        if let Ok(base_url) = std::env::var("IMAGING_OPS_BASE_URL") {
            config.operations_base_url = base_url;
        }

        Ok(config)
    }

    /// Default batching when a start request supplies none.
    pub fn default_batching(&self) -> Result<BatchingOptions> {
        BatchingOptions::new(self.default_batch_size, self.default_max_parallel)
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            },
        )
    }

    /// Retry budgets handed to the orchestration loop.
    pub fn loop_policies(&self) -> LoopPolicies {
        LoopPolicies {
            batch_retry: self.retry_policy(),
            finalize_retry: self.retry_policy(),
        }
    }
}

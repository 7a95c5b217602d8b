//! Executor configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};

/// Configuration for the worker pool and its permit accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of single-threaded workers. Defaults to the number of CPU cores.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Permits per worker governing concurrent logical tasks. The semaphore
    /// built for a pool holds `workers * permits_per_worker` permits.
    #[serde(default = "default_permits_per_worker")]
    pub permits_per_worker: usize,
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_permits_per_worker() -> usize {
    2
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            permits_per_worker: default_permits_per_worker(),
        }
    }
}

impl ExecutorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ExecutorError::Configuration {
                reason: "workers must be greater than 0".to_string(),
            });
        }
        if self.permits_per_worker == 0 {
            return Err(ExecutorError::Configuration {
                reason: "permits_per_worker must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Total permits the semaphore for this pool should hold.
    pub fn total_permits(&self) -> usize {
        self.workers * self.permits_per_worker
    }
}

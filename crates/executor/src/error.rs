//! Error types for the execution substrate.

use thiserror::Error;

/// Errors raised by the worker pool and semaphore layer.
///
/// Panics inside submitted work are deliberately *not* represented here:
/// they are caught on the worker, logged, and swallowed so that a failing
/// shard keeps its previously good state.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The caller asked for a worker index outside the pool.
    #[error("no worker at index {index}: pool has {workers} workers")]
    InvalidWorker { index: usize, workers: usize },

    /// The worker's queue is gone (its pool has been shut down).
    #[error("worker {index} queue disconnected")]
    QueueDisconnected { index: usize },

    /// Invalid executor configuration.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_worker_display() {
        let err = ExecutorError::InvalidWorker {
            index: 9,
            workers: 4,
        };
        assert!(err.to_string().contains("no worker at index 9"));
    }
}

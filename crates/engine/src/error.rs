//! Error types for the engine.
//!
//! Compilation and configuration problems surface to the caller; runtime
//! shard failures are isolated on the workers and never appear here.

use thiserror::Error;

/// Main engine error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A descriptor element had an unrecognized or inadmissible shape.
    #[error("compilation error: {reason}")]
    Compilation { reason: String },

    /// A required callback was missing when constructing an operator.
    #[error("usage error: {reason}")]
    Usage { reason: String },

    /// A submission to the execution substrate failed.
    #[error("execution error: {0}")]
    Execution(#[from] streamfuse_executor::ExecutorError),

    /// Invalid engine configuration.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl Error {
    pub(crate) fn compilation(reason: impl Into<String>) -> Self {
        Error::Compilation {
            reason: reason.into(),
        }
    }

    pub(crate) fn usage(reason: impl Into<String>) -> Self {
        Error::Usage {
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error taxonomy for the executor
//!
//! Every failure the scheduler can observe is one [`ExecutorError`]. The type is
//! `Clone` so that a task outcome can be parked in a completion handle and
//! later handed to whichever thread joins it.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for executor operations
pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// The body of a task returned an error
    #[error("task `{task}` failed: {cause:#}")]
    Failed {
        task: String,
        cause: Arc<anyhow::Error>,
    },

    /// The body of a task panicked
    #[error("task `{task}` panicked: {message}")]
    Panicked { task: String, message: String },

    /// Waiting for a resource lock was interrupted by a pool shutdown
    #[error("interrupted while waiting for resource lock `{resource}`")]
    Interrupted { resource: String },

    /// At least one task of a sibling list failed
    #[error("{} of {total} child tasks failed", .failures.len())]
    ChildrenFailed {
        failures: Vec<ExecutorError>,
        total: usize,
    },

    /// A task with an incompatible lock was asked to run synchronously
    #[error("task `{0}` was deferred but should have been executed synchronously")]
    DeferredSynchronousTask(String),

    /// Compensation for a blocked worker was refused by the saturate predicate
    #[error("thread limit exceeded replacing blocked worker")]
    Saturated,

    #[error("failed to create fork/join pool: {0}")]
    PoolCreation(String),

    #[error("executor has been shut down")]
    Shutdown,

    #[error("invalid parallel execution configuration: {0}")]
    Configuration(String),
}

impl ExecutorError {
    /// Convert the error returned by a task body.
    ///
    /// Bodies that propagate an executor failure with `?` (for example a
    /// container whose children failed) keep that failure as-is instead of
    /// being wrapped a second time.
    pub fn from_task_error(task: &str, error: anyhow::Error) -> Self {
        match error.downcast::<ExecutorError>() {
            Ok(executor_error) => executor_error,
            Err(cause) => ExecutorError::Failed {
                task: task.to_string(),
                cause: Arc::new(cause),
            },
        }
    }

    pub(crate) fn from_panic(task: &str, payload: &(dyn Any + Send)) -> Self {
        ExecutorError::Panicked {
            task: task.to_string(),
            message: panic_message(payload),
        }
    }

    /// Flatten nested sibling failures into the leaf failures that caused them
    pub fn leaf_failures(&self) -> Vec<&ExecutorError> {
        match self {
            ExecutorError::ChildrenFailed { failures, .. } => {
                failures.iter().flat_map(|f| f.leaf_failures()).collect()
            }
            other => vec![other],
        }
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! Units of work the executor schedules

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::ExecutorService;
use crate::lock::ResourceLock;

pub mod handle;
pub mod listener;
pub mod node;

pub use handle::TaskHandle;
pub use listener::{ExecutionListener, ExecutionRecorder, ExecutionSummary, NodeInfo};
pub use node::{NodeTask, NodeTaskBuilder};

/// How a task may be scheduled relative to its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// May run in parallel with its siblings
    Concurrent,
    /// Runs on the thread that schedules its sibling list
    #[default]
    Isolated,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Concurrent => f.write_str("concurrent"),
            ExecutionMode::Isolated => f.write_str("isolated"),
        }
    }
}

/// A node of the test hierarchy.
///
/// `execute` receives the executor it runs on so that containers can hand
/// their children back to it with [`ExecutorService::invoke_all`].
pub trait TestTask: Send + Sync {
    fn name(&self) -> &str;

    fn execution_mode(&self) -> ExecutionMode;

    /// Resources that must be held while the task runs
    fn resource_lock(&self) -> &ResourceLock;

    fn execute(&self, executor: &dyn ExecutorService) -> anyhow::Result<()>;
}

/// Task backed by a closure
pub struct FnTask<F> {
    name: String,
    mode: ExecutionMode,
    lock: ResourceLock,
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, mode: ExecutionMode, lock: ResourceLock, body: F) -> Self {
        Self {
            name: name.into(),
            mode,
            lock,
            body,
        }
    }
}

impl<F> TestTask for FnTask<F>
where
    F: Fn(&dyn ExecutorService) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn resource_lock(&self) -> &ResourceLock {
        &self.lock
    }

    fn execute(&self, executor: &dyn ExecutorService) -> anyhow::Result<()> {
        (self.body)(executor)
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("lock", &self.lock)
            .finish()
    }
}

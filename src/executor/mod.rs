//! Executor services that run a task hierarchy
//!
//! Two implementations share the [`ExecutorService`] contract:
//!
//! - [`ForkJoinPoolExecutorService`]: concurrent siblings run on a
//!   work-stealing pool while isolated siblings run on the scheduling thread
//! - [`SameThreadExecutorService`]: everything runs inline, in declaration
//!   order
//!
//! [`ExecutionStrategy`] picks between them from configuration.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::{
    ExecutorConfig, ParallelExecutionConfiguration, ParallelExecutionConfigurationStrategy,
    ParallelSettings, WorkerSettings, resolve_configuration,
};
use crate::error::{ExecutorError, Result};
use crate::parallel::PoolConstructionMode;
use crate::parallel::pool::JobRef;
use crate::task::{TaskHandle, TestTask};

pub mod fork_join;
pub mod same_thread;
pub(crate) mod thread_lock;

pub use fork_join::ForkJoinPoolExecutorService;
pub use same_thread::SameThreadExecutorService;

/// Runs tasks of a test hierarchy
pub trait ExecutorService: Send + Sync {
    /// Schedule a single task; the handle completes with its outcome
    fn submit(&self, task: Arc<dyn TestTask>) -> Result<TaskHandle>;

    /// Run a list of sibling tasks and wait for all of them.
    ///
    /// Every task runs even if some fail; failures are reported together as
    /// [`ExecutorError::ChildrenFailed`].
    fn invoke_all(&self, tasks: &[Arc<dyn TestTask>]) -> Result<()>;

    /// Stop the service; work not yet started is cancelled
    fn close(&self);
}

/// Run `task` on the current thread while holding its resource lock.
///
/// Returns the task's outcome and the jobs deferred on this thread while it
/// ran, which become runnable once the outermost lock is released.
pub(crate) fn run_locked(
    task: &dyn TestTask,
    executor: &dyn ExecutorService,
) -> (Result<()>, Vec<JobRef>) {
    let lock = task.resource_lock();
    let guard = match lock.acquire() {
        Ok(guard) => guard,
        Err(error) => return (Err(error), Vec::new()),
    };
    thread_lock::increment_nesting(lock.clone());

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.execute(executor))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ExecutorError::from_task_error(task.name(), error)),
        Err(payload) => Err(ExecutorError::from_panic(task.name(), payload.as_ref())),
    };

    let deferred = thread_lock::decrement_nesting(lock);
    drop(guard);
    (outcome, deferred)
}

/// Sequential or parallel execution, chosen from configuration
#[derive(Debug, Clone)]
pub enum ExecutionStrategy {
    Sequential,
    Parallel {
        configuration: ParallelExecutionConfiguration,
        construction: PoolConstructionMode,
        worker: WorkerSettings,
    },
}

impl ExecutionStrategy {
    pub fn from_config(config: &ExecutorConfig) -> anyhow::Result<Self> {
        let settings = config.parallel_settings()?;
        Ok(Self::from_settings(&settings, None)?)
    }

    /// `custom` is consulted when the settings select the custom strategy
    pub fn from_settings(
        settings: &ParallelSettings,
        custom: Option<&dyn ParallelExecutionConfigurationStrategy>,
    ) -> Result<Self> {
        if !settings.enabled {
            return Ok(ExecutionStrategy::Sequential);
        }
        settings.worker.stack_size()?;
        Ok(ExecutionStrategy::Parallel {
            configuration: resolve_configuration(&settings.config, custom)?,
            construction: settings.pool.construction,
            worker: settings.worker.clone(),
        })
    }

    pub fn parallelism(&self) -> usize {
        match self {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::Parallel { configuration, .. } => configuration.parallelism(),
        }
    }

    pub fn create_service(&self) -> Result<Arc<dyn ExecutorService>> {
        match self {
            ExecutionStrategy::Sequential => Ok(Arc::new(SameThreadExecutorService::new())),
            ExecutionStrategy::Parallel {
                configuration,
                construction,
                worker,
            } => {
                let builder = crate::parallel::ForkJoinPoolBuilder::new(configuration.clone())
                    .construction(*construction)
                    .thread_factory(worker.thread_factory()?);
                Ok(Arc::new(ForkJoinPoolExecutorService::with_builder(builder)?))
            }
        }
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ExecutorService, run_locked, thread_lock};
use crate::error::{ExecutorError, Result};
use crate::task::handle::collect_outcomes;
use crate::task::{TaskHandle, TestTask};

/// Runs every task inline on the calling thread, in declaration order
#[derive(Debug, Default)]
pub struct SameThreadExecutorService {
    closed: AtomicBool,
}

impl SameThreadExecutorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `task` may start on the calling thread right now
    fn check(&self, task: &dyn TestTask) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::Shutdown);
        }
        if !thread_lock::is_compatible(task.resource_lock()) {
            return Err(ExecutorError::DeferredSynchronousTask(task.name().to_string()));
        }
        Ok(())
    }

    fn run(&self, task: &dyn TestTask) -> Result<()> {
        let (outcome, deferred) = run_locked(task, self);
        // Jobs parked by pool tasks nested on this thread become runnable now
        for job in deferred {
            job.exec();
        }
        outcome
    }
}

impl ExecutorService for SameThreadExecutorService {
    fn submit(&self, task: Arc<dyn TestTask>) -> Result<TaskHandle> {
        self.check(task.as_ref())?;
        let outcome = self.run(task.as_ref());
        Ok(TaskHandle::completed(task.name(), outcome))
    }

    fn invoke_all(&self, tasks: &[Arc<dyn TestTask>]) -> Result<()> {
        let mut failures = Vec::new();
        for task in tasks {
            self.check(task.as_ref())?;
            if let Err(error) = self.run(task.as_ref()) {
                failures.push(error);
            }
        }
        collect_outcomes(failures, tasks.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

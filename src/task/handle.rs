use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ExecutorError, Result};
use crate::parallel::ForkJoinPool;

/// Completion slot shared between a scheduled task and its handle
pub(crate) struct TaskCell {
    name: String,
    done: AtomicBool,
    outcome: Mutex<Option<Result<()>>>,
    completed: Condvar,
}

impl TaskCell {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
            completed: Condvar::new(),
        })
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Record the outcome; only the first completion wins
    pub(crate) fn complete(&self, outcome: Result<()>) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.done.store(true, Ordering::Release);
        drop(slot);
        self.completed.notify_all();
        true
    }

    fn wait(&self) -> Result<()> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.completed.wait(&mut slot);
        }
    }

    fn wait_until(&self, deadline: Instant) -> Option<Result<()>> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            if self.completed.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().cloned();
            }
        }
    }
}

/// Future-like handle to a submitted task.
///
/// Joining from a worker thread of the owning pool keeps that worker busy
/// with other queued work until the task is done; joining from any other
/// thread simply blocks.
pub struct TaskHandle {
    cell: Arc<TaskCell>,
    pool: Option<ForkJoinPool>,
}

impl TaskHandle {
    pub(crate) fn pending(cell: Arc<TaskCell>, pool: Option<ForkJoinPool>) -> Self {
        Self { cell, pool }
    }

    /// Handle for a task that already ran to completion
    pub fn completed(name: impl Into<String>, outcome: Result<()>) -> Self {
        let cell = TaskCell::new(name);
        cell.complete(outcome);
        Self { cell, pool: None }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// Wait for the task and return its outcome
    pub fn join(self) -> Result<()> {
        if let Some(pool) = &self.pool
            && pool.is_current_thread_in_pool()
        {
            let cell = Arc::clone(&self.cell);
            pool.help_until(|| cell.is_done())?;
        }
        self.cell.wait()
    }

    /// Wait at most `timeout` when called from outside the pool.
    ///
    /// Returns `None` if the task is still running when the timeout elapses.
    pub fn join_timeout(self, timeout: Duration) -> Option<Result<()>> {
        if let Some(pool) = &self.pool
            && pool.is_current_thread_in_pool()
        {
            return Some(self.join());
        }
        self.cell.wait_until(Instant::now() + timeout)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.cell.name)
            .field("done", &self.cell.is_done())
            .finish()
    }
}

/// Map a list of outcomes onto the aggregate result of a sibling list
pub(crate) fn collect_outcomes(failures: Vec<ExecutorError>, total: usize) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ExecutorError::ChildrenFailed { failures, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_completed_handle() {
        let handle = TaskHandle::completed("done", Ok(()));
        assert!(handle.is_done());
        assert_eq!(handle.name(), "done");
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_first_completion_wins() {
        let cell = TaskCell::new("task");
        assert!(cell.complete(Err(ExecutorError::Saturated)));
        assert!(!cell.complete(Ok(())));

        let handle = TaskHandle::pending(cell, None);
        assert!(matches!(handle.join(), Err(ExecutorError::Saturated)));
    }

    #[test]
    fn test_join_blocks_until_completion() {
        let cell = TaskCell::new("slow");
        let handle = TaskHandle::pending(Arc::clone(&cell), None);

        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cell.complete(Ok(()));
        });

        assert!(handle.join().is_ok());
        completer.join().unwrap();
    }

    #[test]
    fn test_join_timeout_expires() {
        let cell = TaskCell::new("never");
        let handle = TaskHandle::pending(cell, None);
        assert!(handle.join_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_collect_outcomes() {
        assert!(collect_outcomes(Vec::new(), 3).is_ok());
        let error = collect_outcomes(vec![ExecutorError::Shutdown], 3).unwrap_err();
        assert!(matches!(error, ExecutorError::ChildrenFailed { total: 3, .. }));
    }
}

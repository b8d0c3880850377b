use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::{ExecutorService, run_locked, thread_lock};
use crate::config::{ExecutorConfig, ParallelExecutionConfiguration};
use crate::error::{ExecutorError, Result};
use crate::parallel::pool::{Job, JobRef};
use crate::parallel::{ForkJoinPool, ForkJoinPoolBuilder, PoolStats};
use crate::task::handle::{TaskCell, collect_outcomes};
use crate::task::{ExecutionMode, TaskHandle, TestTask};

/// Executor backed by a work-stealing [`ForkJoinPool`].
///
/// Within a sibling list, concurrent tasks are forked onto the pool and
/// isolated tasks run on the thread that called
/// [`invoke_all`](ExecutorService::invoke_all). A worker never starts a task
/// whose resource lock conflicts with one it already holds further down its
/// own stack; such a task is deferred and rescheduled once that stack has
/// unwound.
///
/// Cloning shares the pool. The pool is shut down when the last clone is
/// dropped or [`close`](ExecutorService::close) is called.
#[derive(Clone)]
pub struct ForkJoinPoolExecutorService {
    inner: Arc<Inner>,
}

struct Inner {
    pool: ForkJoinPool,
    parallelism: usize,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.pool.shutdown_now();
    }
}

impl ForkJoinPoolExecutorService {
    pub fn new(configuration: ParallelExecutionConfiguration) -> Result<Self> {
        Self::with_builder(ForkJoinPoolBuilder::new(configuration))
    }

    /// Build the pool from the `parallel` configuration section
    pub fn from_config(config: &ExecutorConfig) -> anyhow::Result<Self> {
        let settings = config.parallel_settings()?;
        let configuration = crate::config::resolve_configuration(&settings.config, None)?;
        let builder = ForkJoinPoolBuilder::new(configuration)
            .construction(settings.pool.construction)
            .thread_factory(settings.worker.thread_factory()?);
        Ok(Self::with_builder(builder)?)
    }

    pub fn with_builder(builder: ForkJoinPoolBuilder) -> Result<Self> {
        let pool = builder.build()?;
        let parallelism = pool.parallelism();
        info!("Using fork/join pool with parallelism of {parallelism}");
        Ok(Self {
            inner: Arc::new(Inner { pool, parallelism }),
        })
    }

    pub fn parallelism(&self) -> usize {
        self.inner.parallelism
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub(crate) fn pool(&self) -> &ForkJoinPool {
        &self.inner.pool
    }

    fn exclusive(&self, task: Arc<dyn TestTask>) -> Arc<ExclusiveTask> {
        Arc::new(ExclusiveTask {
            cell: TaskCell::new(task.name()),
            task,
            service: self.clone(),
        })
    }

    /// Put jobs deferred on this thread back on the pool
    fn reschedule(&self, deferred: Vec<JobRef>) {
        if deferred.is_empty() {
            return;
        }
        debug!(count = deferred.len(), "Rescheduling deferred tasks");
        for job in deferred {
            if !job.is_done() {
                self.inner.pool.fork(job);
            }
        }
    }

    /// Sibling scheduling for a worker thread of this pool
    fn invoke_all_in_pool(&self, tasks: &[Arc<dyn TestTask>]) -> Result<()> {
        if let [task] = tasks {
            let exclusive = self.exclusive(Arc::clone(task));
            exclusive.check_compatible()?;
            return match exclusive.run() {
                Ok(()) => Ok(()),
                Err(error) => collect_outcomes(vec![error], 1),
            };
        }

        // A sibling that conflicts with a lock this thread holds could only
        // run after that lock is released, which waits for the sibling
        let mut violation = None;
        let mut forked: VecDeque<Arc<ExclusiveTask>> = VecDeque::new();
        let mut isolated: Vec<Arc<ExclusiveTask>> = Vec::new();
        for task in tasks {
            let exclusive = self.exclusive(Arc::clone(task));
            if let Err(error) = exclusive.check_compatible() {
                violation = Some(error);
                break;
            }
            match task.execution_mode() {
                ExecutionMode::Concurrent => {
                    self.inner.pool.fork(exclusive.clone());
                    forked.push_front(exclusive);
                }
                ExecutionMode::Isolated => isolated.push(exclusive),
            }
        }

        let mut failures = Vec::new();
        if violation.is_none() {
            for exclusive in &isolated {
                if let Err(error) = exclusive.run() {
                    failures.push(error);
                }
            }
        }

        // Most recently forked first, matching the worker's LIFO deque
        for exclusive in forked {
            if let Err(error) = exclusive.join() {
                failures.push(error);
            }
        }

        if let Some(violation) = violation {
            return Err(violation);
        }
        collect_outcomes(failures, tasks.len())
    }
}

impl ExecutorService for ForkJoinPoolExecutorService {
    fn submit(&self, task: Arc<dyn TestTask>) -> Result<TaskHandle> {
        if self.inner.pool.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }
        let exclusive = self.exclusive(task);

        if !self.inner.pool.is_current_thread_in_pool() {
            self.inner.pool.submit(exclusive.clone());
            return Ok(exclusive.handle());
        }

        exclusive.check_compatible()?;
        // Fork while the local queue has room; otherwise run it right here
        if exclusive.task.execution_mode() == ExecutionMode::Concurrent
            && self.inner.pool.surplus_queued_task_count() < self.inner.parallelism
        {
            self.inner.pool.fork(exclusive.clone());
            return Ok(exclusive.handle());
        }

        // The outcome is parked in the handle
        let _ = exclusive.run();
        Ok(exclusive.handle())
    }

    fn invoke_all(&self, tasks: &[Arc<dyn TestTask>]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        if self.inner.pool.is_current_thread_in_pool() {
            return self.invoke_all_in_pool(tasks);
        }

        // Enter the pool through a root task so that isolated siblings run on
        // a worker as well
        let service = self.clone();
        let siblings = tasks.to_vec();
        let root: Arc<dyn TestTask> = Arc::new(crate::task::FnTask::new(
            "invoke_all",
            ExecutionMode::Isolated,
            crate::lock::ResourceLock::nop(),
            move |_| Ok(service.invoke_all_in_pool(&siblings)?),
        ));
        self.submit(root)?.join()
    }

    fn close(&self) {
        self.inner.pool.shutdown_now();
        self.inner.pool.await_termination();
    }
}

impl fmt::Debug for ForkJoinPoolExecutorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkJoinPoolExecutorService")
            .field("parallelism", &self.inner.parallelism)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// A task scheduled on the pool together with its completion cell
pub(crate) struct ExclusiveTask {
    task: Arc<dyn TestTask>,
    service: ForkJoinPoolExecutorService,
    cell: Arc<TaskCell>,
}

impl ExclusiveTask {
    fn handle(&self) -> TaskHandle {
        TaskHandle::pending(Arc::clone(&self.cell), Some(self.service.pool().clone()))
    }

    fn join(&self) -> Result<()> {
        self.handle().join()
    }

    /// Whether the calling thread may run this task synchronously
    fn check_compatible(&self) -> Result<()> {
        if thread_lock::is_compatible(self.task.resource_lock()) {
            Ok(())
        } else {
            Err(ExecutorError::DeferredSynchronousTask(
                self.task.name().to_string(),
            ))
        }
    }

    fn run(&self) -> Result<()> {
        trace!(task = self.task.name(), lock = %self.task.resource_lock(), "Executing task");
        let (outcome, deferred) = run_locked(self.task.as_ref(), &self.service);
        self.cell.complete(outcome.clone());
        self.service.reschedule(deferred);
        self.service.pool().signal_progress();
        outcome
    }
}

impl Job for ExclusiveTask {
    fn exec(self: Arc<Self>) {
        if self.cell.is_done() {
            return;
        }
        if !thread_lock::is_compatible(self.task.resource_lock()) {
            trace!(
                task = self.task.name(),
                depth = thread_lock::depth(),
                "Deferring task with incompatible resource lock"
            );
            let lock = self.task.resource_lock().clone();
            thread_lock::defer(lock, self);
            return;
        }
        if let Err(error) = self.run() {
            debug!(task = self.task.name(), "Task failed: {error}");
        }
    }

    fn cancel(&self) {
        self.cell.complete(Err(ExecutorError::Shutdown));
    }

    fn is_done(&self) -> bool {
        self.cell.is_done()
    }
}

use crossbeam::deque::{Steal, Worker};
use crossbeam::utils::Backoff;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::pool::{JobRef, PoolShared};

/// Default stack size for worker threads
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// How long an idle worker parks before re-scanning the queues
const IDLE_WAIT: Duration = Duration::from_millis(50);

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Rc<WorkerContext>>> = const { RefCell::new(None) };
    static INTERRUPT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Per-thread state of a pool worker
pub(crate) struct WorkerContext {
    pub(crate) index: usize,
    pub(crate) local: Worker<JobRef>,
    pub(crate) pool: Arc<PoolShared>,
}

impl WorkerContext {
    /// Next job: own deque first, then the injector, then other workers
    pub(crate) fn find_job(&self) -> Option<JobRef> {
        self.local.pop().or_else(|| {
            std::iter::repeat_with(|| {
                self.pool
                    .injector()
                    .steal_batch_and_pop(&self.local)
                    .or_else(|| self.pool.steal_from_others(self.index))
            })
            .find(|steal: &Steal<JobRef>| !steal.is_retry())
            .and_then(Steal::success)
        })
    }
}

/// Worker context of the calling thread, if it belongs to a pool
pub(crate) fn current() -> Option<Rc<WorkerContext>> {
    CURRENT_WORKER.with(|current| current.borrow().clone())
}

/// Whether the pool owning the calling thread has been shut down.
///
/// Threads outside any pool are never interrupted.
pub(crate) fn current_thread_interrupted() -> bool {
    INTERRUPT.with(|flag| {
        flag.borrow()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    })
}

#[cfg(test)]
pub(crate) fn set_interrupt_flag(flag: Option<Arc<AtomicBool>>) {
    INTERRUPT.with(|current| *current.borrow_mut() = flag);
}

/// Creates the pool's worker threads.
///
/// The tracing dispatcher active where the factory is created is installed in
/// every worker, so spans and events emitted by tasks reach the same
/// subscriber as the code that configured the executor.
#[derive(Clone)]
pub struct WorkerThreadFactory {
    name_prefix: String,
    stack_size: usize,
    dispatch: tracing::Dispatch,
}

impl WorkerThreadFactory {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            stack_size: DEFAULT_STACK_SIZE,
            dispatch: tracing::dispatcher::get_default(|dispatch| dispatch.clone()),
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub(crate) fn spawn<F>(&self, index: usize, body: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let dispatch = self.dispatch.clone();
        thread::Builder::new()
            .name(format!("{}-{index}", self.name_prefix))
            .stack_size(self.stack_size)
            .spawn(move || tracing::dispatcher::with_default(&dispatch, body))
    }
}

impl Default for WorkerThreadFactory {
    fn default() -> Self {
        Self::new("hierexec-worker")
    }
}

impl std::fmt::Debug for WorkerThreadFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThreadFactory")
            .field("name_prefix", &self.name_prefix)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

/// Main loop of a pool worker.
///
/// Spare workers (spawned to compensate for a blocked join) retire once they
/// have been idle for the pool's keep-alive time and the pool is above its
/// core size.
pub(crate) fn run(shared: Arc<PoolShared>, index: usize, local: Worker<JobRef>, spare: bool) {
    let context = Rc::new(WorkerContext {
        index,
        local,
        pool: Arc::clone(&shared),
    });
    CURRENT_WORKER.with(|current| *current.borrow_mut() = Some(Rc::clone(&context)));
    INTERRUPT.with(|flag| *flag.borrow_mut() = Some(shared.shutdown_flag()));
    debug!(worker = index, spare, "Worker started");

    let backoff = Backoff::new();
    let mut idle_since: Option<Instant> = None;
    let mut retired = false;

    while !shared.is_shutdown() {
        if let Some(job) = context.find_job() {
            idle_since = None;
            backoff.reset();
            job.exec();
            continue;
        }
        if !backoff.is_completed() {
            backoff.snooze();
            continue;
        }

        let epoch = shared.sleep_epoch();
        if let Some(job) = context.find_job() {
            idle_since = None;
            backoff.reset();
            job.exec();
            continue;
        }

        let idle_for = idle_since.get_or_insert_with(Instant::now).elapsed();
        if spare && idle_for >= shared.keep_alive() && shared.try_retire_spare() {
            retired = true;
            break;
        }
        shared.park(epoch, IDLE_WAIT);
    }

    // Work left in the local deque either moves back to the pool or is
    // cancelled when the pool is going away
    while let Some(job) = context.local.pop() {
        if shared.is_shutdown() {
            job.cancel();
        } else {
            shared.injector().push(job);
        }
    }
    if shared.is_shutdown() {
        shared.cancel_queued();
    }
    shared.unregister(index, !retired);

    CURRENT_WORKER.with(|current| current.borrow_mut().take());
    INTERRUPT.with(|flag| flag.borrow_mut().take());
    trace!(worker = index, retired, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_pool_is_not_interrupted() {
        assert!(current().is_none());
        assert!(!current_thread_interrupted());
    }

    #[test]
    fn test_interrupt_flag_is_thread_local() {
        let flag = Arc::new(AtomicBool::new(true));
        set_interrupt_flag(Some(Arc::clone(&flag)));
        assert!(current_thread_interrupted());

        let other = thread::spawn(current_thread_interrupted).join().unwrap();
        assert!(!other);

        set_interrupt_flag(None);
        assert!(!current_thread_interrupted());
    }

    #[test]
    fn test_factory_names_threads() {
        let factory = WorkerThreadFactory::new("unit").with_stack_size(256 * 1024);
        assert_eq!(factory.stack_size(), 256 * 1024);

        let handle = factory
            .spawn(3, || {
                assert_eq!(thread::current().name(), Some("unit-3"));
            })
            .unwrap();
        handle.join().unwrap();
    }
}

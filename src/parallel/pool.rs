use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::worker::{self, WorkerContext, WorkerThreadFactory};
use crate::error::{ExecutorError, Result};

/// How long a blocked join parks before re-scanning for work
const JOIN_WAIT: Duration = Duration::from_millis(10);

/// Unit of work scheduled on a [`ForkJoinPool`]
pub(crate) trait Job: Send + Sync {
    fn exec(self: Arc<Self>);

    /// Complete the job without running it (pool shutdown)
    fn cancel(&self);

    fn is_done(&self) -> bool;
}

pub(crate) type JobRef = Arc<dyn Job>;

/// Decides whether a pool at its thread limit keeps a blocked join waiting
/// (`true`) or fails it with [`ExecutorError::Saturated`] (`false`)
pub type SaturatePredicate = Arc<dyn Fn(&PoolStats) -> bool + Send + Sync>;

/// Point-in-time view of the pool's threads and queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub parallelism: usize,
    pub threads: usize,
    pub idle: usize,
    pub blocked: usize,
    pub queued: usize,
}

/// Thread management knobs of a pool
#[derive(Clone)]
pub(crate) struct PoolTuning {
    pub(crate) parallelism: usize,
    pub(crate) core_pool_size: usize,
    pub(crate) max_pool_size: usize,
    pub(crate) minimum_runnable: usize,
    pub(crate) keep_alive: Duration,
    pub(crate) saturate: Option<SaturatePredicate>,
    /// Whether blocked joins may spawn spare workers
    pub(crate) compensate: bool,
}

impl PoolTuning {
    /// Fixed-size pool without compensation
    pub(crate) fn basic(parallelism: usize) -> Self {
        Self {
            parallelism,
            core_pool_size: parallelism,
            max_pool_size: parallelism,
            minimum_runnable: parallelism,
            keep_alive: Duration::ZERO,
            saturate: None,
            compensate: false,
        }
    }
}

impl fmt::Debug for PoolTuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolTuning")
            .field("parallelism", &self.parallelism)
            .field("core_pool_size", &self.core_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("minimum_runnable", &self.minimum_runnable)
            .field("keep_alive", &self.keep_alive)
            .field("saturate", &self.saturate.is_some())
            .field("compensate", &self.compensate)
            .finish()
    }
}

/// Epoch counter that idle and blocked workers park on
#[derive(Default)]
struct Sleep {
    epoch: Mutex<u64>,
    wakeup: Condvar,
}

impl Sleep {
    fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    fn notify(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.wakeup.notify_all();
    }

    fn wait(&self, seen: u64, timeout: Duration) {
        let mut epoch = self.epoch.lock();
        if *epoch == seen {
            self.wakeup.wait_for(&mut epoch, timeout);
        }
    }
}

/// State shared by the pool handle and all of its workers
pub(crate) struct PoolShared {
    tuning: PoolTuning,
    factory: WorkerThreadFactory,
    injector: Injector<JobRef>,
    stealers: RwLock<Vec<Option<Stealer<JobRef>>>>,
    threads: AtomicUsize,
    idle: AtomicUsize,
    blocked: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    sleep: Sleep,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolShared {
    pub(crate) fn injector(&self) -> &Injector<JobRef> {
        &self.injector
    }

    pub(crate) fn steal_from_others(&self, thief: usize) -> Steal<JobRef> {
        let stealers = self.stealers.read();
        stealers
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != thief)
            .filter_map(|(_, stealer)| stealer.as_ref())
            .map(Stealer::steal)
            .collect()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub(crate) fn keep_alive(&self) -> Duration {
        self.tuning.keep_alive
    }

    pub(crate) fn sleep_epoch(&self) -> u64 {
        self.sleep.epoch()
    }

    /// Park an idle worker until new work is signalled or `timeout` passes
    pub(crate) fn park(&self, epoch: u64, timeout: Duration) {
        self.idle.fetch_add(1, Ordering::SeqCst);
        self.sleep.wait(epoch, timeout);
        self.idle.fetch_sub(1, Ordering::SeqCst);
    }

    fn signal(&self) {
        self.sleep.notify();
    }

    /// Give up a spare thread if the pool is above its core size
    pub(crate) fn try_retire_spare(&self) -> bool {
        let core = self.tuning.core_pool_size;
        self.threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |threads| {
                (threads > core).then(|| threads - 1)
            })
            .is_ok()
    }

    /// Drop a stopped worker's stealer slot
    pub(crate) fn unregister(&self, index: usize, count_thread: bool) {
        if let Some(slot) = self.stealers.write().get_mut(index) {
            *slot = None;
        }
        if count_thread {
            self.threads.fetch_sub(1, Ordering::SeqCst);
        }
        self.signal();
    }

    /// Complete every job still waiting in the injector without running it
    pub(crate) fn cancel_queued(&self) {
        loop {
            match self.injector.steal() {
                Steal::Success(job) => job.cancel(),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }

    fn stats(&self) -> PoolStats {
        let queued = self.injector.len()
            + self
                .stealers
                .read()
                .iter()
                .flatten()
                .map(Stealer::len)
                .sum::<usize>();
        PoolStats {
            parallelism: self.tuning.parallelism,
            threads: self.threads.load(Ordering::SeqCst),
            idle: self.idle.load(Ordering::SeqCst),
            blocked: self.blocked.load(Ordering::SeqCst),
            queued,
        }
    }

    /// Start one worker thread.
    ///
    /// Spare workers reserve their slot against `max_pool_size`; core workers
    /// are always started.
    fn spawn_worker(self: &Arc<Self>, spare: bool) -> Result<()> {
        if spare {
            let max = self.tuning.max_pool_size;
            let reserved = self
                .threads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |threads| {
                    (threads < max).then(|| threads + 1)
                });
            if reserved.is_err() {
                return Err(ExecutorError::Saturated);
            }
        } else {
            self.threads.fetch_add(1, Ordering::SeqCst);
        }

        let local = Worker::new_lifo();
        let index = {
            let mut stealers = self.stealers.write();
            match stealers.iter().position(Option::is_none) {
                Some(free) => {
                    stealers[free] = Some(local.stealer());
                    free
                }
                None => {
                    stealers.push(Some(local.stealer()));
                    stealers.len() - 1
                }
            }
        };

        let shared = Arc::clone(self);
        match self
            .factory
            .spawn(index, move || worker::run(shared, index, local, spare))
        {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|handle| !handle.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(error) => {
                if let Some(slot) = self.stealers.write().get_mut(index) {
                    *slot = None;
                }
                self.threads.fetch_sub(1, Ordering::SeqCst);
                Err(ExecutorError::PoolCreation(format!(
                    "could not start worker thread {index}: {error}"
                )))
            }
        }
    }

    /// Keep enough runnable workers while the calling worker blocks in a join
    fn compensate(self: &Arc<Self>) -> Result<()> {
        if !self.tuning.compensate {
            return Ok(());
        }
        if self.idle.load(Ordering::SeqCst) > 0 {
            self.signal();
            return Ok(());
        }

        let threads = self.threads.load(Ordering::SeqCst);
        let blocked = self.blocked.load(Ordering::SeqCst);
        if threads.saturating_sub(blocked) >= self.tuning.minimum_runnable {
            return Ok(());
        }

        match self.spawn_worker(true) {
            Ok(()) => {
                debug!(threads = threads + 1, blocked, "Started spare worker for blocked join");
                Ok(())
            }
            Err(ExecutorError::Saturated) => match &self.tuning.saturate {
                Some(predicate) if predicate(&self.stats()) => Ok(()),
                _ => Err(ExecutorError::Saturated),
            },
            Err(error) => {
                warn!("Could not compensate for blocked worker: {error}");
                Ok(())
            }
        }
    }
}

/// Marks the calling worker as blocked for as long as the guard lives
struct BlockedGuard<'a> {
    blocked: &'a AtomicUsize,
}

impl<'a> BlockedGuard<'a> {
    fn enter(shared: &'a PoolShared) -> Self {
        shared.blocked.fetch_add(1, Ordering::SeqCst);
        Self {
            blocked: &shared.blocked,
        }
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Work-stealing thread pool.
///
/// Every worker owns a LIFO deque. Work forked from a worker goes onto its own
/// deque, work submitted from outside goes through a shared injector, and idle
/// workers steal from both. A worker that joins an unfinished task keeps
/// running other jobs meanwhile, and when it would otherwise block it asks the
/// pool to compensate with a spare thread.
///
/// The handle is cheap to clone. Dropping it does not stop the workers; call
/// [`shutdown_now`](Self::shutdown_now).
#[derive(Clone)]
pub struct ForkJoinPool {
    shared: Arc<PoolShared>,
}

impl ForkJoinPool {
    /// Start a pool and its core workers
    pub(crate) fn start(tuning: PoolTuning, factory: WorkerThreadFactory) -> Result<Self> {
        let core = tuning.core_pool_size;
        let shared = Arc::new(PoolShared {
            tuning,
            factory,
            injector: Injector::new(),
            stealers: RwLock::new(Vec::with_capacity(core)),
            threads: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            sleep: Sleep::default(),
            handles: Mutex::new(Vec::with_capacity(core)),
        });
        let pool = Self { shared };

        for _ in 0..core {
            if let Err(error) = pool.shared.spawn_worker(false) {
                pool.shutdown_now();
                pool.await_termination();
                return Err(error);
            }
        }
        debug!(tuning = ?pool.shared.tuning, "Fork/join pool started");
        Ok(pool)
    }

    pub fn parallelism(&self) -> usize {
        self.shared.tuning.parallelism
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        self.shared.handles.lock().len()
    }

    pub fn is_current_thread_in_pool(&self) -> bool {
        self.current_worker().is_some()
    }

    pub(crate) fn current_worker(&self) -> Option<Rc<WorkerContext>> {
        worker::current().filter(|context| Arc::ptr_eq(&context.pool, &self.shared))
    }

    /// Queue a job from any thread
    pub(crate) fn submit(&self, job: JobRef) {
        if self.is_shutdown() {
            job.cancel();
            return;
        }
        self.shared.injector.push(job);
        self.shared.signal();
    }

    /// Queue a job on the calling worker's deque, or the injector from outside
    pub(crate) fn fork(&self, job: JobRef) {
        match self.current_worker() {
            Some(context) => {
                context.local.push(job);
                self.shared.signal();
            }
            None => self.submit(job),
        }
    }

    /// Wake parked workers, e.g. after a job completed
    pub(crate) fn signal_progress(&self) {
        self.shared.signal();
    }

    /// Jobs queued on the calling worker beyond what idle workers could
    /// soon steal; zero outside the pool
    pub(crate) fn surplus_queued_task_count(&self) -> usize {
        let Some(context) = self.current_worker() else {
            return 0;
        };
        let parallelism = self.shared.tuning.parallelism;
        let active = self
            .shared
            .threads
            .load(Ordering::SeqCst)
            .saturating_sub(self.shared.idle.load(Ordering::SeqCst));
        let slack = if active > parallelism / 2 {
            0
        } else if active > parallelism / 4 {
            1
        } else if active > parallelism / 8 {
            2
        } else if active > parallelism / 16 {
            4
        } else {
            8
        };
        context.local.len().saturating_sub(slack)
    }

    /// Run other jobs on the calling worker until `done` holds.
    ///
    /// Returns immediately when called from outside the pool.
    pub(crate) fn help_until(&self, done: impl Fn() -> bool) -> Result<()> {
        let Some(context) = self.current_worker() else {
            return Ok(());
        };
        let backoff = Backoff::new();
        let mut blocked: Option<BlockedGuard<'_>> = None;

        while !done() {
            if self.is_shutdown() {
                return Err(ExecutorError::Shutdown);
            }
            if let Some(job) = context.find_job() {
                blocked = None;
                job.exec();
                backoff.reset();
                continue;
            }
            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let epoch = self.shared.sleep_epoch();
            if done() {
                break;
            }
            if blocked.is_none() {
                blocked = Some(BlockedGuard::enter(&self.shared));
                self.shared.compensate()?;
            }
            self.shared.sleep.wait(epoch, JOIN_WAIT);
        }
        Ok(())
    }

    /// Stop accepting work, cancel everything queued and wake all workers.
    ///
    /// Tasks already running finish their current step; lock waits observe
    /// the shutdown as an interruption.
    pub fn shutdown_now(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down fork/join pool");
        self.shared.cancel_queued();
        self.shared.signal();
    }

    /// Join all worker threads except the calling one
    pub fn await_termination(&self) {
        let handles = std::mem::take(&mut *self.shared.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread terminated with a panic");
            }
        }
    }
}

impl fmt::Debug for ForkJoinPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkJoinPool")
            .field("stats", &self.stats())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

use super::pool::{ForkJoinPool, Job, PoolStats, PoolTuning, SaturatePredicate};
use super::worker::WorkerThreadFactory;
use crate::error::ExecutorError;
use crossbeam::channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Job that reports its id and optionally forks children
struct ReportingJob {
    id: usize,
    pool: ForkJoinPool,
    children: usize,
    ran: Sender<(usize, String)>,
    done: AtomicBool,
    cancelled: Arc<AtomicUsize>,
}

impl Job for ReportingJob {
    fn exec(self: Arc<Self>) {
        for child in 0..self.children {
            self.pool.fork(reporting_job(
                &self.pool,
                self.id * 100 + child,
                0,
                self.ran.clone(),
                Arc::clone(&self.cancelled),
            ));
        }
        let thread = std::thread::current().name().unwrap_or_default().to_string();
        self.ran.send((self.id, thread)).unwrap();
        self.done.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

fn reporting_job(
    pool: &ForkJoinPool,
    id: usize,
    children: usize,
    ran: Sender<(usize, String)>,
    cancelled: Arc<AtomicUsize>,
) -> Arc<ReportingJob> {
    Arc::new(ReportingJob {
        id,
        pool: pool.clone(),
        children,
        ran,
        done: AtomicBool::new(false),
        cancelled,
    })
}

/// Job that runs a closure once
struct OnceJob {
    body: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    done: AtomicBool,
}

impl Job for OnceJob {
    fn exec(self: Arc<Self>) {
        let body = self.body.lock().take();
        if let Some(body) = body {
            body();
        }
        self.done.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.body.lock().take();
        self.done.store(true, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

fn once_job(body: impl FnOnce() + Send + 'static) -> Arc<OnceJob> {
    Arc::new(OnceJob {
        body: Mutex::new(Some(Box::new(body))),
        done: AtomicBool::new(false),
    })
}

/// One core worker that may add spares up to `max_pool_size` when it blocks
fn compensating_pool(
    max_pool_size: usize,
    keep_alive: Duration,
    saturate: Option<SaturatePredicate>,
) -> ForkJoinPool {
    let tuning = PoolTuning {
        parallelism: 1,
        core_pool_size: 1,
        max_pool_size,
        minimum_runnable: 1,
        keep_alive,
        saturate,
        compensate: true,
    };
    ForkJoinPool::start(tuning, WorkerThreadFactory::new("pool-test")).unwrap()
}

fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn basic_pool(parallelism: usize) -> ForkJoinPool {
    ForkJoinPool::start(
        PoolTuning::basic(parallelism),
        WorkerThreadFactory::new("pool-test"),
    )
    .unwrap()
}

#[test]
fn test_submitted_jobs_run_on_workers() {
    let pool = basic_pool(2);
    let (tx, rx) = unbounded();
    let cancelled = Arc::new(AtomicUsize::new(0));

    for id in 0..10 {
        pool.submit(reporting_job(&pool, id, 0, tx.clone(), Arc::clone(&cancelled)));
    }

    let mut seen = Vec::new();
    for _ in 0..10 {
        let (id, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(thread.starts_with("pool-test-"));
        seen.push(id);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());

    pool.shutdown_now();
    pool.await_termination();
}

#[test]
fn test_forked_children_are_executed() {
    let pool = basic_pool(3);
    let (tx, rx) = unbounded();
    let cancelled = Arc::new(AtomicUsize::new(0));

    pool.submit(reporting_job(&pool, 1, 5, tx, cancelled));

    let mut seen: Vec<usize> = (0..6)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().0)
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 100, 101, 102, 103, 104]);

    pool.shutdown_now();
    pool.await_termination();
}

#[test]
fn test_outside_pool_queries() {
    let pool = basic_pool(1);
    assert!(!pool.is_current_thread_in_pool());
    assert_eq!(pool.surplus_queued_task_count(), 0);
    assert!(pool.help_until(|| false).is_ok());

    let stats = pool.stats();
    assert_eq!(stats.parallelism, 1);
    assert_eq!(stats.threads, 1);
    assert_eq!(stats.blocked, 0);

    pool.shutdown_now();
    pool.await_termination();
}

#[test]
fn test_submit_after_shutdown_cancels() {
    let pool = basic_pool(1);
    pool.shutdown_now();
    pool.await_termination();
    assert!(pool.is_shutdown());

    let (tx, rx) = unbounded();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let job = reporting_job(&pool, 7, 0, tx, Arc::clone(&cancelled));
    pool.submit(job.clone());

    assert!(job.is_done());
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_blocked_join_starts_spare_worker() {
    let pool = compensating_pool(2, Duration::from_secs(30), None);
    let release = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();

    let worker_pool = pool.clone();
    let flag = Arc::clone(&release);
    pool.submit(once_job(move || {
        tx.send(worker_pool.help_until(|| flag.load(Ordering::SeqCst)))
            .unwrap();
    }));

    assert!(eventually(|| pool.stats().threads == 2));
    assert_eq!(pool.stats().blocked, 1);

    // Work submitted meanwhile still runs
    let (ran_tx, ran_rx) = unbounded();
    pool.submit(once_job(move || ran_tx.send(()).unwrap()));
    assert!(ran_rx.recv_timeout(Duration::from_secs(5)).is_ok());

    release.store(true, Ordering::SeqCst);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

    pool.shutdown_now();
    pool.await_termination();
}

#[test]
fn test_saturated_pool_fails_blocked_join() {
    let never: SaturatePredicate = Arc::new(|_: &PoolStats| false);
    for saturate in [None, Some(never)] {
        let pool = compensating_pool(1, Duration::from_secs(30), saturate);
        let (tx, rx) = unbounded();

        let worker_pool = pool.clone();
        pool.submit(once_job(move || {
            tx.send(worker_pool.help_until(|| false)).unwrap();
        }));

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(ExecutorError::Saturated)));
        assert_eq!(pool.stats().threads, 1);

        pool.shutdown_now();
        pool.await_termination();
    }
}

#[test]
fn test_saturate_predicate_keeps_join_waiting() {
    let consulted = Arc::new(AtomicUsize::new(0));
    let saturate: SaturatePredicate = {
        let consulted = Arc::clone(&consulted);
        Arc::new(move |stats: &PoolStats| {
            consulted.fetch_add(1, Ordering::SeqCst);
            stats.blocked == 1
        })
    };
    let pool = compensating_pool(1, Duration::from_secs(30), Some(saturate));
    let release = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();

    let worker_pool = pool.clone();
    let flag = Arc::clone(&release);
    pool.submit(once_job(move || {
        tx.send(worker_pool.help_until(|| flag.load(Ordering::SeqCst)))
            .unwrap();
    }));

    assert!(eventually(|| consulted.load(Ordering::SeqCst) > 0));
    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
    assert_eq!(pool.stats().threads, 1);

    release.store(true, Ordering::SeqCst);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

    pool.shutdown_now();
    pool.await_termination();
}

#[test]
fn test_idle_spare_retires_after_keep_alive() {
    let pool = compensating_pool(2, Duration::from_millis(50), None);

    for _ in 0..2 {
        let (tx, rx) = unbounded();
        let worker_pool = pool.clone();
        pool.submit(once_job(move || {
            let result = worker_pool.help_until(|| worker_pool.stats().threads == 2);
            tx.send(result).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

        assert!(eventually(|| pool.stats().threads == 1));
        // Let the retired thread run to completion
        std::thread::sleep(Duration::from_millis(100));
    }

    // Handles of retired spares are pruned when the next one starts
    assert_eq!(pool.handle_count(), 2);

    pool.shutdown_now();
    pool.await_termination();
}

//! Per-thread record of the resource locks held by nested task executions
//!
//! A worker that runs a task while already inside another one (because it
//! helped out during a join) must not start anything whose lock conflicts
//! with a lock further down its own stack. Such jobs are parked here and
//! handed back as soon as the lock they conflicted with has been released.

use std::cell::RefCell;

use crate::lock::ResourceLock;
use crate::parallel::pool::JobRef;

thread_local! {
    static THREAD_LOCK: RefCell<Option<ThreadLock>> = const { RefCell::new(None) };
}

/// A parked job together with the lock it is waiting to be compatible with
struct Deferred {
    lock: ResourceLock,
    job: JobRef,
}

#[derive(Default)]
struct ThreadLock {
    locks: Vec<ResourceLock>,
    deferred: Vec<Deferred>,
}

impl ThreadLock {
    fn is_compatible(&self, lock: &ResourceLock) -> bool {
        self.locks.iter().all(|held| held.is_compatible(lock))
    }
}

/// Whether `lock` can be taken by the current thread given what it already
/// holds; always true for a thread outside any task
pub(crate) fn is_compatible(lock: &ResourceLock) -> bool {
    THREAD_LOCK.with(|cell| {
        cell.borrow()
            .as_ref()
            .is_none_or(|thread_lock| thread_lock.is_compatible(lock))
    })
}

/// Park a job whose `lock` conflicts with the current thread's stack
pub(crate) fn defer(lock: ResourceLock, job: JobRef) {
    THREAD_LOCK.with(|cell| {
        cell.borrow_mut()
            .get_or_insert_with(ThreadLock::default)
            .deferred
            .push(Deferred { lock, job });
    });
}

/// Record that the current thread now holds `lock`
pub(crate) fn increment_nesting(lock: ResourceLock) {
    THREAD_LOCK.with(|cell| {
        cell.borrow_mut()
            .get_or_insert_with(ThreadLock::default)
            .locks
            .push(lock);
    });
}

/// Pop `lock` off the current thread's stack.
///
/// Returns the deferred jobs that no longer conflict with what the thread
/// still holds; jobs that do stay parked. Jobs completed elsewhere in the
/// meantime are dropped. When the stack becomes empty the thread's record is
/// discarded.
pub(crate) fn decrement_nesting(lock: &ResourceLock) -> Vec<JobRef> {
    THREAD_LOCK.with(|cell| {
        let mut slot = cell.borrow_mut();
        let Some(thread_lock) = slot.as_mut() else {
            return Vec::new();
        };
        let released = thread_lock.locks.pop();
        debug_assert!(
            released.as_ref().is_some_and(|held| held.same_as(lock)),
            "resource locks must be released in reverse acquisition order"
        );

        let parked = std::mem::take(&mut thread_lock.deferred);
        let (ready, waiting): (Vec<Deferred>, Vec<Deferred>) = parked
            .into_iter()
            .filter(|deferred| !deferred.job.is_done())
            .partition(|deferred| thread_lock.is_compatible(&deferred.lock));
        thread_lock.deferred = waiting;

        if thread_lock.locks.is_empty() {
            slot.take();
        }
        ready.into_iter().map(|deferred| deferred.job).collect()
    })
}

/// Number of locks the current thread holds
pub(crate) fn depth() -> usize {
    THREAD_LOCK.with(|cell| cell.borrow().as_ref().map_or(0, |thread_lock| thread_lock.locks.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{ExclusiveResource, LockManager};
    use crate::parallel::pool::Job;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Marker {
        done: AtomicBool,
    }

    impl Job for Marker {
        fn exec(self: Arc<Self>) {
            self.done.store(true, Ordering::SeqCst);
        }

        fn cancel(&self) {}

        fn is_done(&self) -> bool {
            self.done.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_empty_stack_is_compatible_with_everything() {
        let manager = LockManager::new();
        let lock = manager.lock_for_resource(ExclusiveResource::global_read_write());
        assert!(is_compatible(&lock));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_nesting_and_compatibility() {
        let manager = LockManager::new();
        let read_k = manager.lock_for_resource(ExclusiveResource::read("k"));
        let write_k = manager.lock_for_resource(ExclusiveResource::read_write("k"));
        let write_j = manager.lock_for_resource(ExclusiveResource::read_write("j"));

        increment_nesting(read_k.clone());
        assert_eq!(depth(), 1);
        assert!(is_compatible(&read_k));
        assert!(is_compatible(&write_j));
        assert!(!is_compatible(&write_k));

        increment_nesting(write_j.clone());
        assert!(!is_compatible(&write_j));

        assert!(decrement_nesting(&write_j).is_empty());
        assert!(is_compatible(&write_j));
        assert!(decrement_nesting(&read_k).is_empty());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_deferred_jobs_returned_when_stack_empties() {
        let manager = LockManager::new();
        let outer = manager.lock_for_resource(ExclusiveResource::read_write("k"));
        let inner = ResourceLock::nop();

        increment_nesting(outer.clone());
        increment_nesting(inner.clone());

        let job = Arc::new(Marker::default());
        defer(outer.clone(), job.clone());

        assert!(decrement_nesting(&inner).is_empty());
        let deferred = decrement_nesting(&outer);
        assert_eq!(deferred.len(), 1);
        assert!(!deferred[0].is_done());

        // The record is gone, so nothing is returned twice
        assert!(decrement_nesting(&outer).is_empty());
    }

    #[test]
    fn test_deferred_jobs_returned_once_conflict_is_released() {
        let manager = LockManager::new();
        let root = ResourceLock::nop();
        let write_x = manager.lock_for_resource(ExclusiveResource::read_write("x"));
        let write_y = manager.lock_for_resource(ExclusiveResource::read_write("y"));

        increment_nesting(root.clone());
        increment_nesting(write_x.clone());
        increment_nesting(write_y.clone());

        let needs_x = Arc::new(Marker::default());
        let needs_y = Arc::new(Marker::default());
        defer(write_x.clone(), needs_x.clone());
        defer(write_y.clone(), needs_y.clone());

        // Releasing y frees only the job waiting for y
        let ready = decrement_nesting(&write_y);
        assert_eq!(ready.len(), 1);
        ready[0].clone().exec();
        assert!(needs_y.is_done());
        assert!(!needs_x.is_done());

        // x is released while the root is still held
        let ready = decrement_nesting(&write_x);
        assert_eq!(ready.len(), 1);
        assert_eq!(depth(), 1);

        assert!(decrement_nesting(&root).is_empty());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_jobs_completed_elsewhere_are_dropped() {
        let manager = LockManager::new();
        let write_x = manager.lock_for_resource(ExclusiveResource::read_write("x"));

        increment_nesting(write_x.clone());
        let job = Arc::new(Marker::default());
        defer(write_x.clone(), job.clone());
        job.clone().exec();

        assert!(decrement_nesting(&write_x).is_empty());
    }
}

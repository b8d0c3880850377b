//! Resource lock tests

use super::*;
use crossbeam::channel::bounded;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_compatibility_rules() {
    let manager = LockManager::new();
    let read_k = manager.lock_for_resource(ExclusiveResource::read("k"));
    let write_k = manager.lock_for_resource(ExclusiveResource::read_write("k"));
    let write_other = manager.lock_for_resource(ExclusiveResource::read_write("other"));
    let nop = ResourceLock::nop();

    assert!(read_k.is_compatible(&read_k));
    assert!(!read_k.is_compatible(&write_k));
    assert!(!write_k.is_compatible(&write_k));
    assert!(write_k.is_compatible(&write_other));

    // The no-op lock is compatible with everything
    for lock in [&read_k, &write_k, &write_other, &nop] {
        assert!(nop.is_compatible(lock));
        assert!(lock.is_compatible(&nop));
    }
}

#[test]
fn test_compatibility_is_symmetric_for_composites() {
    let manager = LockManager::new();
    let composite = manager.lock_for([ExclusiveResource::read("a"), ExclusiveResource::read_write("b")]);
    let reads_a = manager.lock_for_resource(ExclusiveResource::read("a"));
    let reads_b = manager.lock_for_resource(ExclusiveResource::read("b"));

    assert!(composite.is_compatible(&reads_a));
    assert!(reads_a.is_compatible(&composite));
    assert!(!composite.is_compatible(&reads_b));
    assert!(!reads_b.is_compatible(&composite));
    assert!(composite.is_exclusive());
    assert!(!reads_a.is_exclusive());
}

#[test]
fn test_guard_releases_on_drop() {
    let manager = LockManager::new();
    let lock = manager.lock_for([ExclusiveResource::read_write("a"), ExclusiveResource::read_write("b")]);

    let guard = lock.acquire().unwrap();
    assert_eq!(guard.lock().to_string(), "a (read_write), b (read_write)");
    drop(guard);

    // Re-acquiring would block forever if the first hold leaked
    let again = lock.acquire().unwrap();
    drop(again);
}

#[test]
fn test_exclusive_holders_never_overlap() {
    let manager = LockManager::new();
    let lock = manager.lock_for_resource(ExclusiveResource::read_write("shared"));
    let guard = lock.acquire().unwrap();

    let (tx, rx) = bounded(1);
    let contender = {
        let lock = lock.clone();
        thread::spawn(move || {
            let _guard = lock.acquire().unwrap();
            tx.send(()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(guard);
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    contender.join().unwrap();
}

#[test]
fn test_shared_holders_run_together() {
    let manager = Arc::new(LockManager::new());
    let first = manager.lock_for_resource(ExclusiveResource::read("config"));
    let _guard = first.acquire().unwrap();

    let (tx, rx) = bounded(1);
    let reader = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            let lock = manager.lock_for_resource(ExclusiveResource::read("config"));
            let _guard = lock.acquire().unwrap();
            tx.send(()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    reader.join().unwrap();
}

#[test]
fn test_nop_lock_display() {
    assert_eq!(ResourceLock::nop().to_string(), "nop");
    assert_eq!(format!("{:?}", ResourceLock::default()), "[]");
}

use std::fmt;
use std::sync::Arc;

use super::key::KeyLock;
use super::resource::ExclusiveResource;
use crate::error::Result;

#[derive(Debug)]
pub(crate) struct LockEntry {
    pub(crate) resource: ExclusiveResource,
    pub(crate) lock: Arc<KeyLock>,
}

/// Lock over zero or more resource keys.
///
/// Entries are kept in the global order established by the
/// [`LockManager`](super::LockManager), and [`acquire`](Self::acquire) takes
/// them in that order. A lock without entries is the no-op lock: it never
/// blocks and is compatible with everything.
///
/// Cloning is cheap and clones share the underlying key locks.
#[derive(Clone)]
pub struct ResourceLock {
    entries: Arc<[LockEntry]>,
}

impl ResourceLock {
    /// The lock that guards nothing
    pub fn nop() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
        }
    }

    pub(crate) fn from_entries(entries: Vec<LockEntry>) -> Self {
        Self {
            entries: Arc::from(entries),
        }
    }

    pub fn resources(&self) -> impl Iterator<Item = &ExclusiveResource> {
        self.entries.iter().map(|entry| &entry.resource)
    }

    pub fn is_nop(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any resource is requested in exclusive mode
    pub fn is_exclusive(&self) -> bool {
        self.resources().any(|resource| resource.mode().is_exclusive())
    }

    /// Whether tasks holding `self` and `other` may run at the same time.
    ///
    /// Pure and symmetric: disjoint keys are always compatible, a shared key
    /// is compatible only when both sides request it for reading.
    pub fn is_compatible(&self, other: &ResourceLock) -> bool {
        self.resources()
            .all(|mine| other.resources().all(|theirs| !mine.conflicts_with(theirs)))
    }

    /// Block until every key is held in its requested mode.
    ///
    /// The returned guard releases the keys in reverse order when dropped. If
    /// the wait is interrupted part-way, the keys taken so far are released
    /// before the error is returned.
    pub fn acquire(&self) -> Result<ResourceLockGuard> {
        let mut guard = ResourceLockGuard {
            lock: self.clone(),
            held: 0,
        };
        for entry in self.entries.iter() {
            entry.lock.acquire(entry.resource.mode())?;
            guard.held += 1;
        }
        Ok(guard)
    }

    /// Whether both handles were produced for the same acquisition request
    pub(crate) fn same_as(&self, other: &ResourceLock) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl Default for ResourceLock {
    fn default() -> Self {
        Self::nop()
    }
}

impl fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.resources()).finish()
    }
}

impl fmt::Display for ResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nop() {
            return f.write_str("nop");
        }
        let resources: Vec<String> = self.resources().map(ToString::to_string).collect();
        f.write_str(&resources.join(", "))
    }
}

/// Scoped hold on a [`ResourceLock`]
#[must_use = "the resource lock is released as soon as the guard is dropped"]
pub struct ResourceLockGuard {
    lock: ResourceLock,
    held: usize,
}

impl ResourceLockGuard {
    pub fn lock(&self) -> &ResourceLock {
        &self.lock
    }
}

impl Drop for ResourceLockGuard {
    fn drop(&mut self) {
        for entry in self.lock.entries[..self.held].iter().rev() {
            entry.lock.release(entry.resource.mode());
        }
    }
}

impl fmt::Debug for ResourceLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLockGuard")
            .field("lock", &self.lock)
            .field("held", &self.held)
            .finish()
    }
}

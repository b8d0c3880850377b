use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::key::KeyLock;
use super::resource::{ExclusiveResource, LockMode};
use super::resource_lock::{LockEntry, ResourceLock};

/// Hands out [`ResourceLock`]s whose keys are backed by shared key locks.
///
/// Every key maps to exactly one [`KeyLock`] for the lifetime of the manager,
/// and every resource set is normalized into the same global order, so two
/// composite locks can never wait on each other in opposite orders.
#[derive(Debug, Default)]
pub struct LockManager {
    locks_by_key: DashMap<String, Arc<KeyLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock covering all `resources`; the no-op lock when the set is empty
    pub fn lock_for<I>(&self, resources: I) -> ResourceLock
    where
        I: IntoIterator<Item = ExclusiveResource>,
    {
        let entries = normalize(resources)
            .into_iter()
            .map(|resource| LockEntry {
                lock: self.key_lock(resource.key()),
                resource,
            })
            .collect();
        ResourceLock::from_entries(entries)
    }

    pub fn lock_for_resource(&self, resource: ExclusiveResource) -> ResourceLock {
        self.lock_for([resource])
    }

    /// Number of distinct keys seen so far
    pub fn key_count(&self) -> usize {
        self.locks_by_key.len()
    }

    fn key_lock(&self, key: &str) -> Arc<KeyLock> {
        let entry = self
            .locks_by_key
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyLock::new(key)));
        Arc::clone(entry.value())
    }
}

/// One request per key (exclusive wins), sorted into the global lock order
fn normalize<I>(resources: I) -> Vec<ExclusiveResource>
where
    I: IntoIterator<Item = ExclusiveResource>,
{
    let mut modes: BTreeMap<String, LockMode> = BTreeMap::new();
    for resource in resources {
        let mode = modes.entry(resource.key().to_string()).or_insert(resource.mode());
        if resource.mode().is_exclusive() {
            *mode = LockMode::ReadWrite;
        }
    }

    let mut normalized: Vec<ExclusiveResource> = modes
        .into_iter()
        .map(|(key, mode)| ExclusiveResource::new(key, mode))
        .collect();
    normalized.sort();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::GLOBAL_KEY;

    #[test]
    fn test_normalize_merges_modes_per_key() {
        let normalized = normalize([
            ExclusiveResource::read("b"),
            ExclusiveResource::read("a"),
            ExclusiveResource::read_write("b"),
            ExclusiveResource::global_read(),
        ]);

        assert_eq!(
            normalized,
            vec![
                ExclusiveResource::global_read(),
                ExclusiveResource::read("a"),
                ExclusiveResource::read_write("b"),
            ]
        );
    }

    #[test]
    fn test_same_key_shares_key_lock() {
        let manager = LockManager::new();
        let first = manager.lock_for_resource(ExclusiveResource::read_write("db"));
        let second = manager.lock_for_resource(ExclusiveResource::read("db"));
        let _other = manager.lock_for([ExclusiveResource::read("cache"), ExclusiveResource::global_read()]);

        assert_eq!(manager.key_count(), 3);
        assert!(manager.locks_by_key.contains_key(GLOBAL_KEY));
        assert!(!first.same_as(&second));
        assert!(!first.is_compatible(&second));
    }

    #[test]
    fn test_empty_set_is_nop() {
        let manager = LockManager::new();
        let lock = manager.lock_for(Vec::new());
        assert!(lock.is_nop());
        assert_eq!(manager.key_count(), 0);
    }
}

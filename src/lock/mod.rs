//! Resource locks
//!
//! Tasks declare the shared state they touch as a set of
//! [`ExclusiveResource`]s. The [`LockManager`] turns such a set into a
//! [`ResourceLock`], which the scheduler uses in two ways:
//!
//! - [`ResourceLock::is_compatible`] decides whether two tasks may run at the
//!   same time, without side effects.
//! - [`ResourceLock::acquire`] blocks until the keys are available and returns
//!   a [`ResourceLockGuard`] that releases them on every exit path.

mod key;
mod manager;
mod resource;
mod resource_lock;

#[cfg(test)]
mod tests;

pub use manager::LockManager;
pub use resource::{ExclusiveResource, GLOBAL_KEY, LockMode};
pub use resource_lock::{ResourceLock, ResourceLockGuard};

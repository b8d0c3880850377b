use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use super::resource::LockMode;
use crate::error::{ExecutorError, Result};
use crate::parallel::worker;

/// How often a waiting thread re-checks its interrupt flag
const INTERRUPT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct KeyState {
    readers: usize,
    writer: bool,
}

impl KeyState {
    fn can_grant(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer,
            LockMode::ReadWrite => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::ReadWrite => self.writer = true,
        }
    }

    fn revoke(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers = self.readers.saturating_sub(1),
            LockMode::ReadWrite => self.writer = false,
        }
    }
}

/// Shared/exclusive lock over a single resource key.
///
/// Unlike `std::sync::RwLock` the hold is not tied to a guard lifetime, so a
/// composite [`ResourceLock`](super::ResourceLock) can own several holds at
/// once. Readers are preferred: a read request is granted whenever no writer
/// holds the key, which keeps nested shared acquisitions on one thread from
/// queueing behind a waiting writer.
#[derive(Debug)]
pub(crate) struct KeyLock {
    key: String,
    state: Mutex<KeyState>,
    released: Condvar,
}

impl KeyLock {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(KeyState::default()),
            released: Condvar::new(),
        }
    }

    /// Block until the key can be held in `mode`
    pub(crate) fn acquire(&self, mode: LockMode) -> Result<()> {
        let mut state = self.state.lock();
        while !state.can_grant(mode) {
            if worker::current_thread_interrupted() {
                return Err(ExecutorError::Interrupted {
                    resource: self.key.clone(),
                });
            }
            self.released.wait_for(&mut state, INTERRUPT_POLL);
        }
        state.grant(mode);
        Ok(())
    }

    pub(crate) fn release(&self, mode: LockMode) {
        self.state.lock().revoke(mode);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn holders(&self) -> (usize, bool) {
        let state = self.state.lock();
        (state.readers, state.writer)
    }
}

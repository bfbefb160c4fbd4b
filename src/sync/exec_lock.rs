//! The single-writer lock around script engine state.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use super::lock;

/// Owns state that only one thread at a time may touch, and remembers which
/// thread that is.
///
/// The main loop holds the lock for the script-running part of each frame;
/// the GC thread holds it only for an idle pass. Code that must run under
/// the lock can check with [`ExecutionLock::assert_held`].
pub struct ExecutionLock<T> {
    state: Mutex<T>,
    holder: Mutex<Option<ThreadId>>,
}

impl<T> ExecutionLock<T> {
    /// Wrap `state` in a new, unheld lock
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            holder: Mutex::new(None),
        }
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> ExecutionGuard<'_, T> {
        let guard = lock(&self.state);
        *lock(&self.holder) = Some(thread::current().id());
        ExecutionGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Whether the current thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        *lock(&self.holder) == Some(thread::current().id())
    }

    /// Panic unless the current thread holds the lock
    pub fn assert_held(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "execution lock is not held by the current thread"
        );
    }

    /// Consume the lock and return the state
    pub fn into_inner(self) -> T {
        self.state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> fmt::Debug for ExecutionLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLock")
            .field("holder", &*lock(&self.holder))
            .finish()
    }
}

/// RAII guard giving exclusive access to the locked state
pub struct ExecutionGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl<T> Deref for ExecutionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ExecutionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ExecutionGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared while the state mutex is still held, so the next holder
        // always records itself after this.
        *lock(self.holder) = None;
    }
}

//! Binary cross-thread wake primitive.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::lock;

/// A boolean flag that one thread sets and another waits on.
///
/// Setting an already-set signal is a no-op; waking does not clear the flag
/// unless the waiter asks for it with [`Signal::wait_and_clear`].
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the signal is set
    pub fn wait(&self) {
        let mut set = lock(&self.flag);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Block until the signal is set, then clear it
    pub fn wait_and_clear(&self) {
        let mut set = lock(&self.flag);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(|p| p.into_inner());
        }
        *set = false;
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns whether the signal was set.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = lock(&self.flag);
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            set = guard;
        }
        true
    }

    /// Set the signal and wake every waiter
    pub fn set_and_notify(&self) {
        let mut set = lock(&self.flag);
        *set = true;
        self.cond.notify_all();
    }

    /// Reset the signal without waking anyone
    pub fn clear(&self) {
        *lock(&self.flag) = false;
    }

    /// Whether the signal is currently set
    pub fn is_set(&self) -> bool {
        *lock(&self.flag)
    }
}

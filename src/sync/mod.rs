//! Cross-thread primitives shared by the scheduler, the engine host and the
//! pipe channel.
//!
//! - [`Signal`]: a binary wake flag guarded by a condition variable
//! - [`WeakHandle`] / [`WeakHandleFactory`]: "is my owner still alive" checks
//!   that can travel to other threads but only dereference on the owner's
//! - [`ExecutionLock`]: the single-writer lock around the script engine

mod exec_lock;
mod signal;
mod weak;

pub use exec_lock::{ExecutionGuard, ExecutionLock};
pub use signal::Signal;
pub use weak::{WeakHandle, WeakHandleFactory, WeakOwner};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// A task that panics while holding one of the scheduler's locks must not
/// wedge every later frame, so poisoning is ignored here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

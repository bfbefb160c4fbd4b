//! The foreground/background task queue pair.
//!
//! Background threads never touch engine state directly: a job posted to the
//! [`ThreadPoolQueue`] computes its result off-thread and hands back a
//! [`Task`] that the [`TaskQueue`] runs on the script thread, under the
//! execution lock.

mod pool;
mod queue;
mod schedule;

pub use pool::{Job, ThreadPoolQueue};
pub use queue::{NextTask, Task, TaskQueue, Waker};

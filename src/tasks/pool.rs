//! Background worker pool.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::queue::{Task, TaskQueue};
use super::schedule::Schedule;
use crate::error::Result;
use crate::sync::lock;

/// A closure run on some worker thread, with no engine lock held
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    schedule: Schedule<Job>,
    quit: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Fixed-size pool of workers draining one shared immediate + delayed queue.
///
/// Jobs must not touch engine state. The usual shape is
/// [`ThreadPoolQueue::post_with_continuation`]: the job computes a result and
/// returns a continuation that is posted to the foreground [`TaskQueue`].
pub struct ThreadPoolQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolQueue {
    /// Start `threads` workers (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                schedule: Schedule::new(),
                quit: false,
            }),
            cond: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::new(),
        };
        for index in 0..threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            // On error the partially built pool is dropped, which joins the
            // workers already started.
            let handle = thread::Builder::new()
                .name(format!("framehost-worker-{}", index))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.push(handle);
        }
        tracing::debug!(threads = pool.workers.len(), "started background pool");
        Ok(pool)
    }

    /// Run `job` as soon as a worker is free
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.shared.state).schedule.push_now(Box::new(job));
        self.shared.cond.notify_one();
    }

    /// Run `job` on a worker once `delay` has elapsed
    pub fn post_delayed<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let fire_at = Instant::now() + delay;
        lock(&self.shared.state).schedule.push_at(fire_at, Box::new(job));
        // Every idle worker recomputes its wait against the new deadline.
        self.shared.cond.notify_all();
    }

    /// Run `work` in the background and post the continuation it returns to
    /// `foreground`.
    pub fn post_with_continuation<C, W>(&self, foreground: &Arc<TaskQueue<C>>, work: W)
    where
        C: 'static,
        W: FnOnce() -> Task<C> + Send + 'static,
    {
        let foreground = Arc::clone(foreground);
        self.post(move || {
            let continuation = work();
            foreground.post_boxed(continuation);
        });
    }

    /// Discard every queued job without running it.
    ///
    /// Jobs already running on a worker are not interrupted.
    pub fn drop_all(&self) {
        let discarded = lock(&self.shared.state).schedule.take_all();
        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "dropping background jobs");
        }
        drop(discarded);
    }

    /// Number of worker threads
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs waiting for a worker
    pub fn pending(&self) -> usize {
        lock(&self.shared.state).schedule.len()
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = lock(&shared.state);
    loop {
        if state.quit {
            return;
        }
        let now = Instant::now();
        let next = match state.schedule.pop_due(now) {
            Some(job) => Some(job),
            None => state.schedule.pop_immediate(),
        };
        if let Some(job) = next {
            drop(state);
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::warn!("background job panicked");
            }
            state = lock(&shared.state);
            continue;
        }
        state = match state.schedule.next_deadline() {
            Some(fire_at) => {
                let wait = fire_at.saturating_duration_since(now);
                match shared.cond.wait_timeout(state, wait) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                }
            }
            None => shared
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
    }
}

impl Drop for ThreadPoolQueue {
    fn drop(&mut self) {
        lock(&self.shared.state).quit = true;
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("background pool stopped");
    }
}

impl fmt::Debug for ThreadPoolQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolQueue")
            .field("threads", &self.workers.len())
            .field("pending", &self.pending())
            .finish()
    }
}

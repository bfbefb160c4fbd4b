//! Foreground task queue, drained by the thread that runs script code.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::schedule::Schedule;
use crate::sync::lock;

/// A closure run once against the queue's context
pub type Task<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Wakes whatever the draining thread blocks on (usually the platform wait)
pub type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// When the next task becomes runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTask {
    /// Something can run right now
    Ready,
    /// The earliest delayed task fires after this long
    After(Duration),
    /// Nothing is queued
    Idle,
}

/// Ordered queue of immediate and delayed closures.
///
/// Posting is allowed from any thread. Draining happens only on the owning
/// thread, with the context (the engine host) passed in by the caller, so a
/// task can never run without the execution lock held.
pub struct TaskQueue<C> {
    schedule: Mutex<Schedule<Task<C>>>,
    waker: Mutex<Option<Waker>>,
}

impl<C> TaskQueue<C> {
    /// Create an empty queue with no waker
    pub fn new() -> Self {
        Self {
            schedule: Mutex::new(Schedule::new()),
            waker: Mutex::new(None),
        }
    }

    /// Install the function called after every post
    pub fn set_waker(&self, waker: Waker) {
        *lock(&self.waker) = Some(waker);
    }

    /// Queue `task` to run on the next drain
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        lock(&self.schedule).push_now(Box::new(task));
        self.wake();
    }

    /// Queue `task` to run once `delay` has elapsed
    pub fn post_delayed<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let fire_at = Instant::now() + delay;
        lock(&self.schedule).push_at(fire_at, Box::new(task));
        self.wake();
    }

    /// Queue an already-boxed task
    pub fn post_boxed(&self, task: Task<C>) {
        lock(&self.schedule).push_now(task);
        self.wake();
    }

    fn wake(&self) {
        let waker = lock(&self.waker).clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    /// How long until something is runnable
    pub fn next_task(&self) -> NextTask {
        let schedule = lock(&self.schedule);
        if schedule.has_immediate() {
            return NextTask::Ready;
        }
        match schedule.next_deadline() {
            None => NextTask::Idle,
            Some(fire_at) => {
                let now = Instant::now();
                if fire_at <= now {
                    NextTask::Ready
                } else {
                    NextTask::After(fire_at - now)
                }
            }
        }
    }

    /// Run every due delayed task and the immediate tasks queued before this
    /// call.
    ///
    /// Due delayed tasks always go first, and readiness is re-checked before
    /// each task, so a delayed task that becomes due mid-drain (including one
    /// posted by an earlier task with a zero delay) runs in this same pass.
    /// Immediate tasks posted during the drain wait for the next call.
    /// Returns the number of tasks run.
    pub fn run_ready_tasks(&self, ctx: &mut C) -> usize {
        let mut batch = lock(&self.schedule).take_immediate();
        let mut ran = 0;
        loop {
            let due = lock(&self.schedule).pop_due(Instant::now());
            let task = match due.or_else(|| batch.pop_front()) {
                Some(task) => task,
                None => break,
            };
            task(ctx);
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(ran, "drained foreground tasks");
        }
        ran
    }

    /// Discard every pending task without running it
    pub fn drop_all(&self) {
        let discarded = lock(&self.schedule).take_all();
        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "dropping foreground tasks");
        }
        // Task destructors run here, outside the queue lock.
        drop(discarded);
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        lock(&self.schedule).len()
    }

    /// Whether no task is queued
    pub fn is_empty(&self) -> bool {
        lock(&self.schedule).is_empty()
    }
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TaskQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Vec<&'static str>;

    #[test]
    fn test_immediate_tasks_run_in_order() {
        let queue: TaskQueue<Log> = TaskQueue::new();
        queue.post(|log| log.push("a"));
        queue.post(|log| log.push("b"));
        let mut log = Vec::new();
        assert_eq!(queue.run_ready_tasks(&mut log), 2);
        assert_eq!(log, vec!["a", "b"]);
        assert_eq!(queue.next_task(), NextTask::Idle);
    }

    #[test]
    fn test_due_delayed_tasks_run_before_immediate() {
        let queue: TaskQueue<Log> = TaskQueue::new();
        queue.post(|log| log.push("immediate"));
        queue.post_delayed(Duration::ZERO, |log| log.push("timer"));
        let mut log = Vec::new();
        queue.run_ready_tasks(&mut log);
        assert_eq!(log, vec!["timer", "immediate"]);
    }

    #[test]
    fn test_immediate_posted_during_drain_waits_for_next_call() {
        let queue: Arc<TaskQueue<Log>> = Arc::new(TaskQueue::new());
        let inner = Arc::clone(&queue);
        queue.post(move |log| {
            log.push("first");
            inner.post(|log| log.push("second"));
        });
        let mut log = Vec::new();
        assert_eq!(queue.run_ready_tasks(&mut log), 1);
        assert_eq!(queue.next_task(), NextTask::Ready);
        assert_eq!(queue.run_ready_tasks(&mut log), 1);
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn test_zero_delay_posted_during_drain_runs_same_pass() {
        let queue: Arc<TaskQueue<Log>> = Arc::new(TaskQueue::new());
        let inner = Arc::clone(&queue);
        queue.post(move |log| {
            log.push("first");
            inner.post_delayed(Duration::ZERO, |log| log.push("timer"));
        });
        queue.post(|log| log.push("second"));
        let mut log = Vec::new();
        assert_eq!(queue.run_ready_tasks(&mut log), 3);
        assert_eq!(log, vec!["first", "timer", "second"]);
    }

    #[test]
    fn test_next_task_reports_delay() {
        let queue: TaskQueue<Log> = TaskQueue::new();
        queue.post_delayed(Duration::from_secs(30), |log| log.push("later"));
        match queue.next_task() {
            NextTask::After(wait) => {
                assert!(wait <= Duration::from_secs(30));
                assert!(wait > Duration::from_secs(29));
            }
            other => panic!("unexpected {:?}", other),
        }
        let mut log = Vec::new();
        assert_eq!(queue.run_ready_tasks(&mut log), 0);
    }

    #[test]
    fn test_drop_all_runs_nothing() {
        let queue: TaskQueue<Log> = TaskQueue::new();
        queue.post(|log| log.push("a"));
        queue.post_delayed(Duration::ZERO, |log| log.push("b"));
        queue.drop_all();
        let mut log = Vec::new();
        assert_eq!(queue.run_ready_tasks(&mut log), 0);
        assert!(log.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_waker_called_on_post() {
        let queue: TaskQueue<Log> = TaskQueue::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        queue.set_waker(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        queue.post(|_| {});
        queue.post_delayed(Duration::from_millis(5), |_| {});
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_post_from_other_thread() {
        let queue: Arc<TaskQueue<Log>> = Arc::new(TaskQueue::new());
        let remote = Arc::clone(&queue);
        std::thread::spawn(move || remote.post(|log| log.push("remote")))
            .join()
            .unwrap();
        let mut log = Vec::new();
        queue.run_ready_tasks(&mut log);
        assert_eq!(log, vec!["remote"]);
    }
}

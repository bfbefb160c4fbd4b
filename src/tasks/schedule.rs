//! Immediate + delayed task storage shared by both queues.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

/// A task waiting for its fire time
struct Delayed<T> {
    fire_at: Instant,
    /// Insertion order, breaks ties between equal fire times
    seq: u64,
    task: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    // Reversed so the max-heap pops the earliest deadline, then the oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// FIFO of immediate tasks plus a min-heap of delayed tasks.
///
/// Delayed tasks come out in non-decreasing deadline order, FIFO among equal
/// deadlines.
pub(crate) struct Schedule<T> {
    immediate: VecDeque<T>,
    delayed: BinaryHeap<Delayed<T>>,
    next_seq: u64,
}

impl<T> Schedule<T> {
    pub fn new() -> Self {
        Self {
            immediate: VecDeque::new(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push_now(&mut self, task: T) {
        self.immediate.push_back(task);
    }

    pub fn push_at(&mut self, fire_at: Instant, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Delayed { fire_at, seq, task });
    }

    /// Pop the earliest delayed task whose fire time has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        match self.delayed.peek() {
            Some(top) if top.fire_at <= now => self.delayed.pop().map(|d| d.task),
            _ => None,
        }
    }

    pub fn pop_immediate(&mut self) -> Option<T> {
        self.immediate.pop_front()
    }

    /// Take every immediate task queued so far
    pub fn take_immediate(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.immediate)
    }

    pub fn has_immediate(&self) -> bool {
        !self.immediate.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|d| d.fire_at)
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.delayed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.immediate.len() + self.delayed.len()
    }

    /// Move everything out so the caller can drop it outside any lock
    pub fn take_all(&mut self) -> Schedule<T> {
        std::mem::replace(self, Schedule::new())
    }
}

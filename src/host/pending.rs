//! Background work whose result settles a script promise.
//!
//! The promise stays on the script thread in a [`PendingSlots`] entry; only
//! the slot index and a weak handle to the host travel with the job. The
//! worker's result is applied by a foreground task, and is discarded if the
//! host was destroyed or replaced in the meantime.

use super::ScriptHost;
use crate::engine::{PromiseKey, ScriptEngine, ScriptValue};
use crate::error::ScriptError;

/// Applies a background result to its promise on the script thread
pub type Resolution<E> =
    Box<dyn FnOnce(&mut ScriptHost<E>, PromiseKey) -> Result<(), ScriptError> + Send + 'static>;

/// Slab of values parked while background work runs
#[derive(Debug)]
pub(crate) struct PendingSlots<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> PendingSlots<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn store(&mut self, value: T) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);
                index
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    pub fn take(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Resolve the promise with `value`
pub fn resolve_value<E: ScriptEngine + 'static>(value: ScriptValue) -> Resolution<E> {
    Box::new(move |host, promise| {
        host.engine_mut().resolve_promise(promise, value);
        Ok(())
    })
}

/// Resolve the promise with `undefined`
pub fn resolve_undefined<E: ScriptEngine + 'static>() -> Resolution<E> {
    resolve_value(ScriptValue::Null)
}

/// Reject the promise with an exception carrying `message`
pub fn reject<E: ScriptEngine + 'static>(message: impl Into<String>) -> Resolution<E> {
    let error = ScriptError::new(message);
    Box::new(move |host, promise| {
        host.engine_mut().reject_promise(promise, error);
        Ok(())
    })
}

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    /// Run `work` on the background pool and settle a new promise with the
    /// [`Resolution`] it returns.
    ///
    /// If the resolution itself fails, a still-pending promise is rejected
    /// with that exception; otherwise the exception is reported.
    pub fn post_to_background_and_resolve<W>(&mut self, work: W) -> PromiseKey
    where
        W: FnOnce() -> Resolution<E> + Send + 'static,
    {
        let promise = self.engine.create_promise();
        let slot = self.pending.store(promise);
        let weak = self.weak_handle();
        let foreground = std::sync::Arc::clone(&self.task_queue);

        self.background.post(move || {
            if weak.is_gone() {
                return;
            }
            let resolution = work();
            foreground.post(move |host: &mut ScriptHost<E>| {
                let Some(host) = weak.resolve(host) else {
                    tracing::trace!("dropping background result for a destroyed host");
                    return;
                };
                if let Some(promise) = host.pending.take(slot) {
                    host.apply_resolution(promise, resolution);
                }
            });
        });
        promise
    }

    fn apply_resolution(&mut self, promise: PromiseKey, resolution: Resolution<E>) {
        if let Err(error) = resolution(self, promise) {
            if self.engine.promise_state(promise).is_pending() {
                self.engine.reject_promise(promise, error);
            } else {
                self.report_exception(&error);
            }
        }
        self.checkpoint();
    }
}

//! Idle-time garbage collection thread.
//!
//! The thread sleeps on a [`Signal`]. Each signal buys one idle pass: it
//! takes the execution lock, so script code and GC never overlap, and gives
//! the engine a bounded budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::ScriptEngine;
use crate::error::Result;
use crate::host::ScriptHost;
use crate::sync::{ExecutionLock, Signal};

pub(crate) struct GcThread {
    signal: Arc<Signal>,
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GcThread {
    pub fn start<E: ScriptEngine + 'static>(
        host: Arc<ExecutionLock<ScriptHost<E>>>,
        budget: Duration,
    ) -> Result<Self> {
        let signal = Arc::new(Signal::new());
        let quit = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("framehost-gc".to_string())
            .spawn({
                let signal = Arc::clone(&signal);
                let quit = Arc::clone(&quit);
                move || {
                    tracing::debug!("gc thread started");
                    loop {
                        signal.wait_and_clear();
                        if quit.load(Ordering::Acquire) {
                            break;
                        }
                        let more = host.lock().idle_notification(budget);
                        tracing::trace!(more, "idle gc pass");
                    }
                    tracing::debug!("gc thread stopped");
                }
            })?;
        Ok(Self {
            signal,
            quit,
            handle: Some(handle),
        })
    }

    /// Schedule one idle pass. Coalesces with a pass already pending.
    pub fn request_idle_pass(&self) {
        self.signal.set_and_notify();
    }

    /// Stop and join the thread. Its reference to the host is released.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.quit.store(true, Ordering::Release);
        self.signal.set_and_notify();
        if handle.join().is_err() {
            tracing::warn!("gc thread panicked");
        }
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        self.stop();
    }
}

//! The per-frame orchestrator.
//!
//! One iteration of [`MainLoop::run_frame`]:
//!
//! 1. Under the execution lock: dispatch buffered input, drain the
//!    foreground queue, run animation-frame callbacks, report unhandled
//!    rejections.
//! 2. Signal the GC thread.
//! 3. Render, once the main module has loaded.
//! 4. Reload if one was requested.
//! 5. Pick a [`WaitPolicy`] and block on the platform.
//!
//! The host is rebuilt from scratch on reload; the queues and the platform
//! live as long as the loop.

mod gc;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use crate::config::HostConfig;
use crate::engine::{ScriptEngine, ScriptValue};
use crate::error::{Result, ScriptError};
use crate::host::{EventKind, HostDelegate, HostQueue, ScriptHost};
use crate::platform::{Platform, WaitPolicy, WindowEvent};
use crate::sync::{lock, ExecutionLock};
use crate::tasks::{NextTask, ThreadPoolQueue};

use gc::GcThread;

/// Exceptions kept for [`MainLoop::recent_exceptions`]
const MAX_RECENT_EXCEPTIONS: usize = 1000;

/// Where the loop is in a program's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// First load in progress
    Loading,
    Running,
    /// Tearing down for a reload
    Reloading,
}

/// Shared between the loop and its host's delegate
#[derive(Debug, Default)]
struct LoopShared {
    main_module_loaded: AtomicBool,
    exceptions: Mutex<VecDeque<String>>,
}

struct LoopDelegate {
    shared: Arc<LoopShared>,
}

impl HostDelegate for LoopDelegate {
    fn on_main_module_loaded(&mut self) {
        self.shared.main_module_loaded.store(true, Ordering::Release);
    }

    fn on_exception(&mut self, error: &ScriptError) {
        tracing::error!("{}", error);
        let mut exceptions = lock(&self.shared.exceptions);
        if exceptions.len() == MAX_RECENT_EXCEPTIONS {
            exceptions.pop_front();
        }
        exceptions.push_back(error.to_string());
    }
}

type EngineFactory<E> = Box<dyn FnMut() -> E>;

/// Drives one script program against a [`Platform`]
pub struct MainLoop<E: ScriptEngine + 'static, P: Platform> {
    config: HostConfig,
    platform: P,
    /// Declared before the foreground queue so workers are joined first
    background: Arc<ThreadPoolQueue>,
    task_queue: Arc<HostQueue<E>>,
    host: Option<Arc<ExecutionLock<ScriptHost<E>>>>,
    gc: Option<GcThread>,
    engine_factory: EngineFactory<E>,
    shared: Arc<LoopShared>,
    /// Input waiting for the next dispatch under the lock
    pending_events: Vec<(EventKind, ScriptValue)>,
    reload_requested: bool,
    state: LoopState,
    exit_code: Option<i32>,
    start: Instant,
}

impl<E: ScriptEngine + 'static, P: Platform> MainLoop<E, P> {
    /// Create the loop and load the initial module.
    ///
    /// `engine_factory` is called once per load, so every reload gets a
    /// fresh engine.
    pub fn new(
        config: HostConfig,
        platform: P,
        engine_factory: impl FnMut() -> E + 'static,
    ) -> Result<Self> {
        let task_queue = Arc::new(HostQueue::new());
        task_queue.set_waker(platform.waker());
        let background = Arc::new(ThreadPoolQueue::new(config.worker_threads)?);
        let mut main_loop = Self {
            config,
            platform,
            task_queue,
            background,
            host: None,
            gc: None,
            engine_factory: Box::new(engine_factory),
            shared: Arc::new(LoopShared::default()),
            pending_events: Vec::new(),
            reload_requested: false,
            state: LoopState::Loading,
            exit_code: None,
            start: Instant::now(),
        };
        main_loop.reload()?;
        Ok(main_loop)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn task_queue(&self) -> &Arc<HostQueue<E>> {
        &self.task_queue
    }

    pub fn background(&self) -> &Arc<ThreadPoolQueue> {
        &self.background
    }

    /// The current host, shared with the GC thread
    pub fn host(&self) -> Option<&Arc<ExecutionLock<ScriptHost<E>>>> {
        self.host.as_ref()
    }

    pub fn main_module_loaded(&self) -> bool {
        self.shared.main_module_loaded.load(Ordering::Acquire)
    }

    /// Exception messages reported since start, oldest first
    pub fn recent_exceptions(&self) -> Vec<String> {
        lock(&self.shared.exceptions).iter().cloned().collect()
    }

    /// Reload at the end of the current frame
    pub fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    /// Exit code requested by the program, if any
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Run frames until the window closes. Returns the exit code.
    pub fn run_until_closed(&mut self) -> Result<i32> {
        while !self.platform.should_close() {
            self.run_frame()?;
        }
        Ok(self.exit_code.unwrap_or(0))
    }

    /// Run one iteration of the loop
    pub fn run_frame(&mut self) -> Result<()> {
        let loaded = self.main_module_loaded();
        let mut wants_animation_frame = false;

        if let Some(host) = &self.host {
            let mut host = host.lock();
            for (kind, payload) in self.pending_events.drain(..) {
                host.dispatch_event(kind, &payload);
            }
            let ran = self.task_queue.run_ready_tasks(&mut *host);
            host.checkpoint();
            if loaded {
                let now_ms = self.start.elapsed().as_secs_f64() * 1000.0;
                host.call_animation_frame_callbacks(now_ms);
            }
            host.report_unhandled_rejections();
            if let Some(code) = host.quit_requested() {
                self.exit_code.get_or_insert(code);
            }
            wants_animation_frame = host.has_animation_frame_callbacks();
            tracing::trace!(tasks = ran, "frame");
        }

        if let Some(gc) = &self.gc {
            gc.request_idle_pass();
        }

        if self.exit_code.is_some() {
            self.platform.set_should_close(true);
            return Ok(());
        }

        if self.main_module_loaded() {
            if self.state == LoopState::Loading {
                self.state = LoopState::Running;
                self.platform.on_loading_finished();
            }
            self.platform.render_and_swap();
        }

        if std::mem::take(&mut self.reload_requested) {
            self.reload()?;
            return Ok(());
        }

        let policy = self.wait_policy(wants_animation_frame);
        let events = self.platform.wait(policy);
        for event in events {
            self.handle_window_event(event);
        }
        Ok(())
    }

    fn wait_policy(&self, wants_animation_frame: bool) -> WaitPolicy {
        let policy = if wants_animation_frame || self.platform.wants_frames() {
            WaitPolicy::Poll
        } else {
            match self.task_queue.next_task() {
                NextTask::Ready => WaitPolicy::Poll,
                NextTask::After(delay) => WaitPolicy::Timeout(delay),
                NextTask::Idle => WaitPolicy::Indefinite,
            }
        };
        // A minimized window does not spin; posting a task still wakes it.
        if policy == WaitPolicy::Poll && self.platform.is_minimized() {
            return WaitPolicy::Indefinite;
        }
        policy
    }

    fn handle_window_event(&mut self, event: WindowEvent) {
        if event.is_reload_key() {
            self.request_reload();
            return;
        }
        match event {
            WindowEvent::Close => self.handle_close(),
            WindowEvent::Resize { .. } => self.handle_resize(event),
            other => self.pending_events.extend(other.to_script_events()),
        }
    }

    /// Close unless a `close` listener handles the event
    fn handle_close(&mut self) {
        let cancelled = match &self.host {
            Some(host) if self.main_module_loaded() => {
                let mut host = host.lock();
                let payload = json!({ "type": EventKind::Close.as_str() });
                host.has_listeners(EventKind::Close) && host.dispatch_event(EventKind::Close, &payload)
            }
            _ => false,
        };
        if cancelled {
            tracing::debug!("close cancelled by listener");
        } else {
            self.platform.set_should_close(true);
        }
    }

    /// Deliver a resize immediately, after the input buffered before it,
    /// and present a frame at the new size
    fn handle_resize(&mut self, event: WindowEvent) {
        let loaded = self.main_module_loaded();
        if let Some(host) = &self.host {
            let mut host = host.lock();
            for (kind, payload) in self.pending_events.drain(..) {
                host.dispatch_event(kind, &payload);
            }
            for (kind, payload) in event.to_script_events() {
                host.dispatch_event(kind, &payload);
            }
            if loaded {
                let now_ms = self.start.elapsed().as_secs_f64() * 1000.0;
                host.call_animation_frame_callbacks(now_ms);
            }
        }
        if loaded {
            self.platform.render_and_swap();
        }
    }

    // -----------------------------------------------------------------------
    // Reload
    // -----------------------------------------------------------------------

    /// Tear down the current program, if any, and load it again
    fn reload(&mut self) -> Result<()> {
        self.platform.on_loading_start();
        if self.host.is_some() {
            tracing::debug!("reloading");
            self.state = LoopState::Reloading;
            self.teardown();
        }

        self.shared.main_module_loaded.store(false, Ordering::Release);
        let engine = (self.engine_factory)();
        let delegate = Box::new(LoopDelegate {
            shared: Arc::clone(&self.shared),
        });
        let mut host = ScriptHost::new(
            engine,
            self.config.clone(),
            Arc::clone(&self.task_queue),
            Arc::clone(&self.background),
            delegate,
        );
        if self.config.is_child_process {
            host.attach_to_parent()?;
        }
        let host = Arc::new(ExecutionLock::new(host));
        self.gc = Some(GcThread::start(
            Arc::clone(&host),
            self.config.gc_idle_budget(),
        )?);

        let module = self.config.initial_module.clone();
        host.lock().load_main_module(&module);
        self.host = Some(host);
        self.state = if self.main_module_loaded() {
            self.platform.on_loading_finished();
            LoopState::Running
        } else {
            LoopState::Loading
        };
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut gc) = self.gc.take() {
            gc.stop();
        }
        if let Some(host) = &self.host {
            host.lock().remove_all_listeners();
        }
        if let Some(host) = self.host.take() {
            if Arc::strong_count(&host) > 1 {
                tracing::warn!("host still shared at teardown");
            }
            drop(host);
        }
        self.pending_events.clear();
        self.background.drop_all();
        self.task_queue.drop_all();
    }
}

impl<E: ScriptEngine + 'static, P: Platform> Drop for MainLoop<E, P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

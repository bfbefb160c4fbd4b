//! The script engine host.
//!
//! [`ScriptHost`] owns the single engine instance together with everything
//! that must only be touched under the execution lock: the module table,
//! in-flight dynamic imports, pending background results, animation-frame
//! callbacks, event listeners and child processes. It is also the context
//! every foreground task runs against, including the continuations of file
//! operations run on the background pool.

mod bootstrap;
mod events;
mod file;
mod frames;
mod modules;
mod pending;
mod process;
mod rejections;

pub use bootstrap::{CONSOLE_MODULE, DEFAULT_MODULE};
pub use events::{EventKind, EventListeners, UnknownEvent};
pub use file::{basename, current_dir, dirname, home_dir, temp_dir, SEPARATOR};
pub use modules::{is_valid_import, normalize_path, ModuleState, CONSOLE_REFERRER};
pub use pending::{reject, resolve_undefined, resolve_value, Resolution};
pub use process::{LogLevel, ProcessId};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap as HashMap;

use crate::config::HostConfig;
use crate::engine::{FunctionKey, ModuleKey, PromiseKey, PromiseState, ScriptEngine, ScriptValue};
use crate::error::ScriptError;
use crate::sync::{WeakHandle, WeakHandleFactory, WeakOwner};
use crate::tasks::{TaskQueue, ThreadPoolQueue};

use frames::AnimationFrames;
use modules::ModuleTable;
use pending::PendingSlots;
use process::ProcessTable;
use rejections::RejectionTracker;

/// Foreground queue whose tasks run against a [`ScriptHost`]
pub type HostQueue<E> = TaskQueue<ScriptHost<E>>;

/// Receives host-level notifications on the script thread
pub trait HostDelegate: Send {
    /// The main module finished evaluating (or failed to)
    fn on_main_module_loaded(&mut self);

    /// An exception reached the top level
    fn on_exception(&mut self, error: &ScriptError);
}

/// A promise the host is waiting on before it can continue some work
#[derive(Debug)]
enum Watcher {
    /// Main module suspended at a top-level await
    MainModule { evaluation: PromiseKey },
    /// Dynamic import whose module suspended at a top-level await
    DynamicImport {
        target: String,
        module: ModuleKey,
        evaluation: PromiseKey,
    },
}

impl Watcher {
    fn promise(&self) -> PromiseKey {
        match self {
            Watcher::MainModule { evaluation } => *evaluation,
            Watcher::DynamicImport { evaluation, .. } => *evaluation,
        }
    }
}

/// Owns the engine and all state reachable from script code
pub struct ScriptHost<E: ScriptEngine> {
    engine: E,
    delegate: Box<dyn HostDelegate>,
    config: HostConfig,
    task_queue: Arc<HostQueue<E>>,
    background: Arc<ThreadPoolQueue>,
    modules: ModuleTable,
    /// Resolver promise per resolved target path
    dynamic_imports: HashMap<String, PromiseKey>,
    watchers: Vec<Watcher>,
    rejections: RejectionTracker,
    pending: PendingSlots<PromiseKey>,
    frames: AnimationFrames,
    events: EventListeners,
    processes: ProcessTable,
    suppress_next_script_result: bool,
    quit: Option<i32>,
    weak: WeakHandleFactory<ScriptHost<E>>,
}

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    /// Create a host around `engine`. Must be called on the script thread.
    pub fn new(
        engine: E,
        config: HostConfig,
        task_queue: Arc<HostQueue<E>>,
        background: Arc<ThreadPoolQueue>,
        delegate: Box<dyn HostDelegate>,
    ) -> Self {
        Self {
            engine,
            delegate,
            modules: ModuleTable::new(&config.base_path),
            config,
            task_queue,
            background,
            dynamic_imports: HashMap::default(),
            watchers: Vec::new(),
            rejections: RejectionTracker::default(),
            pending: PendingSlots::new(),
            frames: AnimationFrames::new(),
            events: EventListeners::new(),
            processes: ProcessTable::new(),
            suppress_next_script_result: false,
            quit: None,
            weak: WeakHandleFactory::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub fn task_queue(&self) -> &Arc<HostQueue<E>> {
        &self.task_queue
    }

    pub fn background(&self) -> &Arc<ThreadPoolQueue> {
        &self.background
    }

    /// A handle continuations can carry across threads and reloads
    pub fn weak_handle(&self) -> WeakHandle<Self> {
        self.weak.make_handle()
    }

    /// State of a module by canonical name
    pub fn module_state(&self, name: &str) -> Option<&ModuleState> {
        self.modules.state(name)
    }

    /// Number of modules in the table
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Number of dynamic imports not yet settled
    pub fn dynamic_imports_in_flight(&self) -> usize {
        self.dynamic_imports.len()
    }

    /// Number of background results not yet applied
    pub fn pending_results(&self) -> usize {
        self.pending.len()
    }

    // -----------------------------------------------------------------------
    // Exceptions
    // -----------------------------------------------------------------------

    /// Surface an uncaught exception.
    ///
    /// In a child process the exception is also forwarded to the parent.
    pub fn report_exception(&mut self, error: &ScriptError) {
        if self.config.is_child_process {
            self.forward_exception_to_parent(error);
        }
        self.delegate.on_exception(error);
    }

    /// Report every rejection that is still unhandled
    pub fn report_unhandled_rejections(&mut self) {
        self.absorb_rejection_events();
        for error in self.rejections.take() {
            self.report_exception(&error);
        }
    }

    fn absorb_rejection_events(&mut self) {
        let events = self.engine.take_rejection_events();
        self.rejections.absorb(events);
    }

    /// Keep a rejection the host handles itself out of the report
    fn forget_rejection(&mut self, promise: PromiseKey) {
        self.absorb_rejection_events();
        self.rejections.forget(promise);
    }

    // -----------------------------------------------------------------------
    // Promise settlement
    // -----------------------------------------------------------------------

    /// Run microtasks and act on every watched promise that has settled.
    ///
    /// Called after each batch of script execution.
    pub fn checkpoint(&mut self) {
        loop {
            self.engine.run_microtasks();
            let watchers = std::mem::take(&mut self.watchers);
            let mut settled = Vec::new();
            for watcher in watchers {
                match self.engine.promise_state(watcher.promise()) {
                    PromiseState::Pending => self.watchers.push(watcher),
                    state => settled.push((watcher, state)),
                }
            }
            if settled.is_empty() {
                return;
            }
            for (watcher, state) in settled {
                self.settle(watcher, state);
            }
        }
    }

    fn settle(&mut self, watcher: Watcher, state: PromiseState) {
        match watcher {
            Watcher::MainModule { evaluation } => {
                if let PromiseState::Rejected(error) = state {
                    self.forget_rejection(evaluation);
                    self.report_exception(&error);
                }
                tracing::debug!("main module settled");
                self.delegate.on_main_module_loaded();
            }
            Watcher::DynamicImport {
                target,
                module,
                evaluation,
            } => match state {
                PromiseState::Rejected(error) => {
                    self.forget_rejection(evaluation);
                    self.finish_import(&target, Err(error));
                }
                _ => {
                    let namespace = self.engine.module_namespace(module);
                    self.finish_import(&target, Ok(namespace));
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Console
    // -----------------------------------------------------------------------

    /// Evaluate console input, returning the printable result.
    ///
    /// Exceptions are reported and yield `None`, as does a result swallowed
    /// by [`ScriptHost::suppress_next_script_result`].
    pub fn execute_script(&mut self, source: &str) -> Option<String> {
        let result = self.engine.execute_script(CONSOLE_REFERRER, source);
        let suppress = std::mem::take(&mut self.suppress_next_script_result);
        self.checkpoint();
        match result {
            Err(error) => {
                self.report_exception(&error);
                None
            }
            Ok(_) if suppress => None,
            Ok(ScriptValue::String(text)) => Some(text),
            Ok(value) => Some(value.to_string()),
        }
    }

    /// Drop the result of the next [`ScriptHost::execute_script`] call
    pub fn suppress_next_script_result(&mut self) {
        self.suppress_next_script_result = true;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a window-level listener by event name
    pub fn add_event_listener(&mut self, name: &str, listener: FunctionKey) -> bool {
        self.events.add(name, listener)
    }

    /// Unregister a window-level listener, releasing it
    pub fn remove_event_listener(&mut self, name: &str, listener: FunctionKey) -> bool {
        let removed = self.events.remove(name, listener);
        if removed {
            self.engine.release_function(listener);
        }
        removed
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.events.has_listeners(kind)
    }

    /// Call every window listener for `kind` with `payload`.
    ///
    /// Returns true if any listener returned a truthy value. Listener
    /// exceptions are reported; the remaining listeners still run unless
    /// the engine cannot continue.
    pub fn dispatch_event(&mut self, kind: EventKind, payload: &ScriptValue) -> bool {
        let listeners = self.events.listeners(kind).to_vec();
        self.call_listeners(&listeners, payload)
    }

    fn call_listeners(&mut self, listeners: &[FunctionKey], payload: &ScriptValue) -> bool {
        let args = std::slice::from_ref(payload);
        let mut handled = false;
        for &listener in listeners {
            match self.engine.call_function(listener, args) {
                Ok(value) => handled |= is_truthy(&value),
                Err(error) => {
                    self.report_exception(&error);
                    if !error.can_continue {
                        break;
                    }
                }
            }
        }
        self.checkpoint();
        handled
    }

    /// Drop every window listener and pending animation frame
    pub fn remove_all_listeners(&mut self) {
        let mut released = self.events.remove_all();
        released.extend(self.frames.clear());
        for function in released {
            self.engine.release_function(function);
        }
    }

    // -----------------------------------------------------------------------
    // Animation frames
    // -----------------------------------------------------------------------

    /// Ask for `callback` to run before the next rendered frame
    pub fn request_animation_frame(&mut self, callback: FunctionKey) -> u32 {
        self.frames.request(callback)
    }

    /// Cancel a pending request. Ids outside the pending batch are ignored.
    pub fn cancel_animation_frame(&mut self, id: u32) {
        if let Some(callback) = self.frames.cancel(id) {
            self.engine.release_function(callback);
        }
    }

    pub fn has_animation_frame_callbacks(&self) -> bool {
        self.frames.has_pending()
    }

    /// Run this frame's callbacks with the frame timestamp.
    ///
    /// Callbacks requested while these run are deferred to the next frame.
    pub fn call_animation_frame_callbacks(&mut self, now_ms: f64) {
        let batch = self.frames.take_batch();
        if batch.is_empty() {
            return;
        }
        let timestamp = [ScriptValue::from(now_ms)];
        let mut callbacks = batch.into_iter();
        for (_, callback) in callbacks.by_ref() {
            let result = self.engine.call_function(callback, &timestamp);
            self.engine.release_function(callback);
            if let Err(error) = result {
                self.report_exception(&error);
                if !error.can_continue {
                    break;
                }
            }
        }
        for (_, skipped) in callbacks {
            self.engine.release_function(skipped);
        }
        self.checkpoint();
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Ask the main loop to stop with `code`
    pub fn request_quit(&mut self, code: i32) {
        if self.quit.is_none() {
            tracing::debug!(code, "quit requested");
            self.quit = Some(code);
        }
    }

    pub fn quit_requested(&self) -> Option<i32> {
        self.quit
    }

    /// Give the engine an incremental GC slice. Returns true if more work
    /// remains.
    pub fn idle_notification(&mut self, budget: Duration) -> bool {
        self.engine.idle_notification(budget)
    }
}

impl<E: ScriptEngine> WeakOwner for ScriptHost<E> {
    fn weak_factory(&self) -> &WeakHandleFactory<Self> {
        &self.weak
    }
}

impl<E: ScriptEngine> Drop for ScriptHost<E> {
    fn drop(&mut self) {
        // Stale continuations must observe the host as gone before any
        // other state is torn down.
        self.weak.invalidate();
    }
}

/// Script truthiness of a value
fn is_truthy(value: &ScriptValue) -> bool {
    match value {
        ScriptValue::Null => false,
        ScriptValue::Bool(b) => *b,
        ScriptValue::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        ScriptValue::String(s) => !s.is_empty(),
        ScriptValue::Array(_) | ScriptValue::Object(_) => true,
    }
}

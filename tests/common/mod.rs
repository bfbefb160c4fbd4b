//! Shared test helpers for integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framehost::engine::{
    CompiledModule, Evaluation, FunctionKey, ModuleKey, PromiseKey, PromiseState, RejectionEvent,
};
use framehost::{
    HostConfig, HostDelegate, HostQueue, LinkOnlyEngine, ScriptEngine, ScriptError, ScriptHost,
    ScriptValue, ThreadPoolQueue,
};
use rustc_hash::FxHashMap as HashMap;
use tempfile::TempDir;

/// Calls observed across every engine sharing the log
pub type CallLog = Arc<Mutex<Vec<String>>>;

type NativeFn = Box<dyn FnMut(&[ScriptValue]) -> Result<ScriptValue, ScriptError> + Send>;

/// A programmable engine for driving the host.
///
/// Linking and namespaces come from [`LinkOnlyEngine`]. On top of that a
/// module whose source contains
/// - `syntax error` fails to compile,
/// - a line `throw <message>` rejects when evaluated,
/// - the word `await` suspends evaluation until the test settles
///   [`TestEngine::top_level_await`].
pub struct TestEngine {
    inner: LinkOnlyEngine,
    generation: u32,
    log: CallLog,
    names: HashMap<ModuleKey, String>,
    throws: HashMap<ModuleKey, String>,
    awaits: HashMap<ModuleKey, bool>,
    tla: HashMap<String, PromiseKey>,
    pub compiles: HashMap<String, usize>,
    pub instantiations: Vec<String>,
    functions: HashMap<FunctionKey, NativeFn>,
    next_function: u64,
    pub released: Vec<FunctionKey>,
    extra_events: Vec<RejectionEvent>,
    pub idle_passes: usize,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_log(0, CallLog::default())
    }

    pub fn with_log(generation: u32, log: CallLog) -> Self {
        Self {
            inner: LinkOnlyEngine::new(),
            generation,
            log,
            names: HashMap::default(),
            throws: HashMap::default(),
            awaits: HashMap::default(),
            tla: HashMap::default(),
            compiles: HashMap::default(),
            instantiations: Vec::new(),
            functions: HashMap::default(),
            next_function: 1,
            released: Vec::new(),
            extra_events: Vec::new(),
            idle_passes: 0,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(format!("gen{}: {}", self.generation, entry));
    }

    /// How often the module with a name ending in `suffix` was compiled
    pub fn compile_count(&self, suffix: &str) -> usize {
        self.compiles
            .iter()
            .filter(|(name, _)| name.ends_with(suffix))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Register a native function scripts would hold
    pub fn function(
        &mut self,
        f: impl FnMut(&[ScriptValue]) -> Result<ScriptValue, ScriptError> + Send + 'static,
    ) -> FunctionKey {
        let key = FunctionKey(self.next_function);
        self.next_function += 1;
        self.functions.insert(key, Box::new(f));
        key
    }

    /// Promise a suspended module (name ending in `suffix`) is waiting on
    pub fn top_level_await(&self, suffix: &str) -> Option<PromiseKey> {
        self.tla
            .iter()
            .find(|(name, _)| name.ends_with(suffix))
            .map(|(_, promise)| *promise)
    }

    /// Simulate script attaching a `catch` to an already rejected promise
    pub fn handle_rejection(&mut self, promise: PromiseKey) {
        self.extra_events
            .push(RejectionEvent::HandlerAddedAfterReject { promise });
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for TestEngine {
    fn compile_module(&mut self, name: &str, source: &str) -> Result<CompiledModule, ScriptError> {
        *self.compiles.entry(name.to_string()).or_default() += 1;
        if source.contains("syntax error") {
            return Err(ScriptError::new("SyntaxError: Unexpected identifier"));
        }
        let compiled = self.inner.compile_module(name, source)?;
        self.names.insert(compiled.key, name.to_string());
        if let Some(line) = source.lines().find(|line| line.trim_start().starts_with("throw ")) {
            let message = line.trim_start()["throw ".len()..].trim_end_matches(';').to_string();
            self.throws.insert(compiled.key, message);
        }
        self.awaits.insert(compiled.key, source.contains("await"));
        Ok(compiled)
    }

    fn instantiate_module(
        &mut self,
        module: ModuleKey,
        resolve: &mut dyn FnMut(ModuleKey, &str) -> Option<ModuleKey>,
    ) -> Result<(), ScriptError> {
        if let Some(name) = self.names.get(&module) {
            self.instantiations.push(name.clone());
        }
        self.inner.instantiate_module(module, resolve)
    }

    fn evaluate_module(&mut self, module: ModuleKey) -> Evaluation {
        if let Some(message) = self.throws.get(&module) {
            return Evaluation::Rejected {
                promise: None,
                error: ScriptError::new(message.clone()),
            };
        }
        let evaluation = self.inner.evaluate_module(module);
        if evaluation == Evaluation::Fulfilled && self.awaits.get(&module).copied().unwrap_or(false) {
            let promise = self.inner.create_promise();
            if let Some(name) = self.names.get(&module) {
                self.tla.insert(name.clone(), promise);
            }
            return Evaluation::Pending(promise);
        }
        evaluation
    }

    fn module_namespace(&mut self, module: ModuleKey) -> ScriptValue {
        self.inner.module_namespace(module)
    }

    fn create_promise(&mut self) -> PromiseKey {
        self.inner.create_promise()
    }

    fn resolve_promise(&mut self, promise: PromiseKey, value: ScriptValue) {
        self.record(format!("resolve {} {}", promise, value));
        self.inner.resolve_promise(promise, value);
    }

    fn reject_promise(&mut self, promise: PromiseKey, error: ScriptError) {
        self.record(format!("reject {} {}", promise, error.message));
        self.inner.reject_promise(promise, error);
    }

    fn promise_state(&self, promise: PromiseKey) -> PromiseState {
        self.inner.promise_state(promise)
    }

    fn take_rejection_events(&mut self) -> Vec<RejectionEvent> {
        let mut events = self.inner.take_rejection_events();
        events.append(&mut self.extra_events);
        events
    }

    fn call_function(&mut self, function: FunctionKey, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        self.record(format!("call #{}", function.0));
        match self.functions.get_mut(&function) {
            Some(f) => f(args),
            None => Err(ScriptError::new(format!(
                "TypeError: function #{} was released",
                function.0
            ))),
        }
    }

    fn release_function(&mut self, function: FunctionKey) {
        self.functions.remove(&function);
        self.released.push(function);
    }

    fn execute_script(&mut self, name: &str, source: &str) -> Result<ScriptValue, ScriptError> {
        self.inner.execute_script(name, source)
    }

    fn idle_notification(&mut self, _budget: Duration) -> bool {
        self.idle_passes += 1;
        false
    }
}

// ---------------------------------------------------------------------------
// Delegate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Recorded {
    pub loaded: usize,
    pub exceptions: Vec<ScriptError>,
}

/// Delegate that records every notification
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Recorded>>);

impl Recorder {
    pub fn loaded(&self) -> usize {
        self.0.lock().unwrap().loaded
    }

    pub fn messages(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .exceptions
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

impl HostDelegate for Recorder {
    fn on_main_module_loaded(&mut self) {
        self.0.lock().unwrap().loaded += 1;
    }

    fn on_exception(&mut self, error: &ScriptError) {
        self.0.lock().unwrap().exceptions.push(error.clone());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A host over `engine` rooted at `base`, with its queues and recorder
pub struct Fixture {
    pub host: ScriptHost<TestEngine>,
    pub queue: Arc<HostQueue<TestEngine>>,
    pub background: Arc<ThreadPoolQueue>,
    pub recorder: Recorder,
}

impl Fixture {
    pub fn new(base: &Path) -> Self {
        Self::with_engine(base, TestEngine::new())
    }

    pub fn with_engine(base: &Path, engine: TestEngine) -> Self {
        let config = HostConfig {
            base_path: base.to_path_buf(),
            ..HostConfig::default()
        };
        Self::with_config(config, engine)
    }

    pub fn with_config(config: HostConfig, engine: TestEngine) -> Self {
        let queue = Arc::new(HostQueue::new());
        let background = Arc::new(ThreadPoolQueue::new(2).unwrap());
        let recorder = Recorder::default();
        let host = ScriptHost::new(
            engine,
            config,
            Arc::clone(&queue),
            Arc::clone(&background),
            Box::new(recorder.clone()),
        );
        Self {
            host,
            queue,
            background,
            recorder,
        }
    }

    /// Run ready foreground tasks until none are left
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.queue.run_ready_tasks(&mut self.host);
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Drain the foreground queue until `done` holds or the timeout passes
    pub fn drain_until(&mut self, timeout: Duration, mut done: impl FnMut(&mut ScriptHost<TestEngine>) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            self.drain();
            if done(&mut self.host) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

/// Write `files` (relative path, source) under a new temporary directory
pub fn module_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, source) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, source).unwrap();
    }
    dir
}

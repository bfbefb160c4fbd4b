//! Module graph loading and dynamic imports.
//!
//! Loading is two-phase: a module's record is reserved and compiled before
//! any of its imports are visited, so an import cycle finds the existing
//! record instead of loading the module again. The whole graph is then
//! instantiated from the root and the root is evaluated.

use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashMap as HashMap;

use super::bootstrap;
use super::{ScriptHost, Watcher};
use crate::engine::{Evaluation, ModuleKey, PromiseKey, ScriptEngine, ScriptValue};
use crate::error::{Error, Result, ScriptError};

/// Referrer name used for code typed into the console
pub const CONSOLE_REFERRER: &str = "<console>";

/// Whether `specifier` is a relative import (`./` or `../`)
pub fn is_valid_import(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Lexically normalize a path, folding `.` and `..` components.
///
/// The filesystem is not consulted, so symlinks are not resolved. `..` at
/// the root is dropped; leading `..` of a relative path is kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Lifecycle of one module record
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    /// Reserved, source not compiled yet
    Uncompiled,
    Compiled,
    Instantiated,
    /// Evaluated at least once; the outcome is reused by later imports
    Evaluated(Evaluation),
}

#[derive(Debug)]
struct ModuleRecord {
    key: Option<ModuleKey>,
    requests: Vec<String>,
    state: ModuleState,
}

/// Every module of the current program, keyed by canonical name
#[derive(Debug)]
pub(crate) struct ModuleTable {
    base_path: PathBuf,
    records: HashMap<String, ModuleRecord>,
    names: HashMap<ModuleKey, String>,
}

impl ModuleTable {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            records: HashMap::default(),
            names: HashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn state(&self, name: &str) -> Option<&ModuleState> {
        self.records.get(name).map(|record| &record.state)
    }

    fn key_of(&self, name: &str) -> Option<ModuleKey> {
        self.records.get(name).and_then(|record| record.key)
    }

    /// Canonical name of a program's entry module
    pub fn resolve_entry(&self, name: &str) -> Result<String> {
        if bootstrap::is_reserved(name) {
            return match bootstrap::source(name) {
                Some(_) => Ok(name.to_string()),
                None => Err(Error::InvalidModuleName(name.to_string())),
            };
        }
        Ok(canonical(&self.base_path.join(name)))
    }

    /// Canonical name of `specifier` imported from `referrer`
    pub fn resolve_specifier(&self, referrer: &str, specifier: &str) -> Result<String> {
        if !is_valid_import(specifier) {
            return Err(Error::InvalidSpecifier(specifier.to_string()));
        }
        let dir = if referrer == CONSOLE_REFERRER || bootstrap::is_reserved(referrer) {
            self.base_path.as_path()
        } else {
            Path::new(referrer).parent().unwrap_or(&self.base_path)
        };
        Ok(canonical(&dir.join(specifier)))
    }

    /// Name relative to the base path, for messages
    pub fn display_name(&self, name: &str) -> String {
        let base = normalize_path(&self.base_path);
        let path = Path::new(name);
        match path.strip_prefix(&base) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative.display().to_string(),
            _ => name.to_string(),
        }
    }

    fn reserve(&mut self, name: &str) {
        self.records.insert(
            name.to_string(),
            ModuleRecord {
                key: None,
                requests: Vec::new(),
                state: ModuleState::Uncompiled,
            },
        );
    }

    fn set_compiled(&mut self, name: &str, key: ModuleKey, requests: Vec<String>) {
        if let Some(record) = self.records.get_mut(name) {
            record.key = Some(key);
            record.requests = requests;
            record.state = ModuleState::Compiled;
            self.names.insert(key, name.to_string());
        }
    }

    fn remove(&mut self, name: &str) {
        if let Some(record) = self.records.remove(name) {
            if let Some(key) = record.key {
                self.names.remove(&key);
            }
        }
    }

    /// Resolver handed to the engine during instantiation
    fn resolve_link(&self, referrer: ModuleKey, specifier: &str) -> Option<ModuleKey> {
        let name = self.names.get(&referrer)?;
        let target = self.resolve_specifier(name, specifier).ok()?;
        self.key_of(&target)
    }

    fn is_linked(&self, name: &str) -> bool {
        matches!(
            self.state(name),
            Some(ModuleState::Instantiated) | Some(ModuleState::Evaluated(_))
        )
    }

    /// Mark `root` and every compiled module reachable from it as linked
    fn mark_instantiated(&mut self, root: &str) {
        let mut stack = vec![root.to_string()];
        while let Some(name) = stack.pop() {
            let Some(record) = self.records.get_mut(&name) else {
                continue;
            };
            if record.state != ModuleState::Compiled {
                continue;
            }
            record.state = ModuleState::Instantiated;
            let requests = record.requests.clone();
            for specifier in requests {
                if let Ok(target) = self.resolve_specifier(&name, &specifier) {
                    stack.push(target);
                }
            }
        }
    }
}

fn canonical(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

/// Turn any load failure into a `Load` error and append a breadcrumb
fn with_breadcrumb(err: Error, line: String) -> Error {
    let (message, mut breadcrumbs) = match err {
        Error::Load {
            message,
            breadcrumbs,
        } => (message, breadcrumbs),
        other => (other.to_string(), Vec::new()),
    };
    breadcrumbs.push(line);
    Error::Load {
        message,
        breadcrumbs,
    }
}

/// Progress of a dynamic import after its synchronous part
enum ImportProgress {
    Ready(ModuleKey),
    Suspended(ModuleKey, PromiseKey),
}

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    // -----------------------------------------------------------------------
    // Main module
    // -----------------------------------------------------------------------

    /// Load, link and evaluate the program's entry module.
    ///
    /// The delegate's `on_main_module_loaded` fires once evaluation has
    /// settled: immediately for a synchronous body or a failure (after the
    /// exception is reported), later for a body suspended at a top-level
    /// await.
    pub fn load_main_module(&mut self, name: &str) {
        match self.start_main_module(name) {
            Ok(None) => self.delegate.on_main_module_loaded(),
            Ok(Some(evaluation)) => self.watchers.push(Watcher::MainModule { evaluation }),
            Err(err) => {
                self.report_exception(&err.to_script_error());
                self.delegate.on_main_module_loaded();
            }
        }
    }

    fn start_main_module(&mut self, name: &str) -> Result<Option<PromiseKey>> {
        let entry = self.modules.resolve_entry(name)?;
        tracing::debug!(module = %self.modules.display_name(&entry), "loading main module");
        let key = self.load_module_graph(&entry)?;
        self.instantiate(&entry, key)?;
        match self.evaluate(&entry, key) {
            Evaluation::Fulfilled => Ok(None),
            Evaluation::Pending(evaluation) => Ok(Some(evaluation)),
            Evaluation::Rejected { promise, error } => {
                if let Some(promise) = promise {
                    self.forget_rejection(promise);
                }
                Err(Error::Script(error))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Graph loading
    // -----------------------------------------------------------------------

    /// Compile `name` and its transitive imports, each at most once.
    ///
    /// On failure every record created by this call is removed again, so a
    /// later import of the same graph starts from scratch.
    fn load_module_graph(&mut self, name: &str) -> Result<ModuleKey> {
        let mut created = Vec::new();
        let result = self.load_module(name, &mut created);
        if result.is_err() {
            for name in &created {
                self.modules.remove(name);
            }
        }
        result
    }

    fn load_module(&mut self, name: &str, created: &mut Vec<String>) -> Result<ModuleKey> {
        if let Some(record) = self.modules.records.get(name) {
            return record
                .key
                .ok_or_else(|| Error::load(format!("Module '{}' is still loading", name)));
        }

        self.modules.reserve(name);
        created.push(name.to_string());

        let shown = self.modules.display_name(name);
        let compiled = self
            .compile(name, &shown)
            .map_err(|err| with_breadcrumb(err, format!("    loading {}", shown)))?;
        tracing::trace!(module = %shown, imports = compiled.requests.len(), "compiled module");
        self.modules
            .set_compiled(name, compiled.key, compiled.requests.clone());

        for specifier in &compiled.requests {
            let target = self
                .modules
                .resolve_specifier(name, specifier)
                .map_err(|err| with_breadcrumb(err, format!("    loading {}", shown)))?;
            self.load_module(&target, created)
                .map_err(|err| with_breadcrumb(err, format!("       from {}", shown)))?;
        }
        Ok(compiled.key)
    }

    fn compile(&mut self, name: &str, display: &str) -> Result<crate::engine::CompiledModule> {
        let source = if bootstrap::is_reserved(name) {
            bootstrap::source(name)
                .ok_or_else(|| Error::InvalidModuleName(name.to_string()))?
                .to_string()
        } else {
            std::fs::read_to_string(name)
                .map_err(|e| Error::load(format!("Error: failed to read '{}': {}", display, e)))?
        };
        Ok(self.engine.compile_module(name, &source)?)
    }

    fn instantiate(&mut self, name: &str, key: ModuleKey) -> Result<()> {
        if self.modules.is_linked(name) {
            return Ok(());
        }
        let modules = &self.modules;
        let linked = self
            .engine
            .instantiate_module(key, &mut |referrer, specifier| {
                modules.resolve_link(referrer, specifier)
            });
        if let Err(err) = linked {
            let display = self.modules.display_name(name);
            return Err(with_breadcrumb(
                Error::Script(err),
                format!("    loading {}", display),
            ));
        }
        self.modules.mark_instantiated(name);
        Ok(())
    }

    fn evaluate(&mut self, name: &str, key: ModuleKey) -> Evaluation {
        if let Some(ModuleState::Evaluated(previous)) = self.modules.state(name) {
            return previous.clone();
        }
        let evaluation = self.engine.evaluate_module(key);
        if let Some(record) = self.modules.records.get_mut(name) {
            record.state = ModuleState::Evaluated(evaluation.clone());
        }
        evaluation
    }

    // -----------------------------------------------------------------------
    // Dynamic imports
    // -----------------------------------------------------------------------

    /// Start `import(specifier)` from `referrer`, returning its promise.
    ///
    /// The load runs as a foreground task. Imports of a target that is
    /// already in flight share the first request's promise until it
    /// settles. An invalid specifier yields an already rejected promise.
    pub fn import_dynamic(&mut self, referrer: &str, specifier: &str) -> PromiseKey {
        let target = match self.modules.resolve_specifier(referrer, specifier) {
            Ok(target) => target,
            Err(err) => {
                let promise = self.engine.create_promise();
                self.engine.reject_promise(promise, err.to_script_error());
                return promise;
            }
        };

        if let Some(&resolver) = self.dynamic_imports.get(&target) {
            return resolver;
        }

        let resolver = self.engine.create_promise();
        self.dynamic_imports.insert(target.clone(), resolver);
        let weak = self.weak_handle();
        self.task_queue.post(move |host: &mut ScriptHost<E>| {
            if let Some(host) = weak.resolve(host) {
                host.run_dynamic_import(&target);
            }
        });
        resolver
    }

    fn run_dynamic_import(&mut self, target: &str) {
        if !self.dynamic_imports.contains_key(target) {
            return;
        }
        match self.start_import(target) {
            Ok(ImportProgress::Ready(module)) => {
                let namespace = self.engine.module_namespace(module);
                self.finish_import(target, Ok(namespace));
            }
            Ok(ImportProgress::Suspended(module, evaluation)) => {
                self.watchers.push(Watcher::DynamicImport {
                    target: target.to_string(),
                    module,
                    evaluation,
                });
            }
            Err(err) => self.finish_import(target, Err(err.to_script_error())),
        }
        self.checkpoint();
    }

    fn start_import(&mut self, target: &str) -> Result<ImportProgress> {
        let key = self.load_module_graph(target)?;
        self.instantiate(target, key)?;
        match self.evaluate(target, key) {
            Evaluation::Fulfilled => Ok(ImportProgress::Ready(key)),
            Evaluation::Pending(evaluation) => Ok(ImportProgress::Suspended(key, evaluation)),
            Evaluation::Rejected { promise, error } => {
                if let Some(promise) = promise {
                    self.forget_rejection(promise);
                }
                Err(Error::Script(error))
            }
        }
    }

    /// Settle the import of `target` and retire its request
    pub(super) fn finish_import(&mut self, target: &str, outcome: std::result::Result<ScriptValue, ScriptError>) {
        let Some(resolver) = self.dynamic_imports.remove(target) else {
            return;
        };
        match outcome {
            Ok(namespace) => self.engine.resolve_promise(resolver, namespace),
            Err(error) => {
                tracing::debug!(module = %self.modules.display_name(target), "dynamic import failed");
                self.engine.reject_promise(resolver, error);
            }
        }
    }
}

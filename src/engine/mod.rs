//! The boundary between the host and a script engine.
//!
//! The host never looks inside script values or compiled code. It drives the
//! engine through [`ScriptEngine`] using opaque keys for modules, promises
//! and functions, and exchanges data as JSON-shaped [`ScriptValue`]s.

mod link_only;

pub use link_only::LinkOnlyEngine;

use std::fmt;
use std::time::Duration;

use crate::error::ScriptError;

/// Data passed between the host and script code
pub type ScriptValue = serde_json::Value;

/// A compiled module inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(pub u32);

/// A promise object inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseKey(pub u64);

/// A callable script function retained by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey(pub u64);

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

impl fmt::Display for PromiseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// Result of compiling one module's source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub key: ModuleKey,
    /// Import specifiers in declaration order, as written in the source
    pub requests: Vec<String>,
}

/// Outcome of evaluating a module body
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The body ran to completion
    Fulfilled,
    /// The body suspended at a top-level await; settles with this promise
    Pending(PromiseKey),
    /// The body threw. `promise` is the rejected evaluation promise, if the
    /// engine created one, so the host can keep it out of rejection reports.
    Rejected {
        promise: Option<PromiseKey>,
        error: ScriptError,
    },
}

/// Current state of a promise
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(ScriptValue),
    Rejected(ScriptError),
}

impl PromiseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

/// Promise-rejection bookkeeping reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionEvent {
    /// A promise was rejected while nothing was listening
    RejectedWithoutHandler { promise: PromiseKey, error: ScriptError },
    /// A handler was attached to an already-rejected promise
    HandlerAddedAfterReject { promise: PromiseKey },
}

/// A single-threaded script engine driven by the host.
///
/// Implementations may be moved between threads but are only ever called by
/// the thread holding the execution lock.
pub trait ScriptEngine: Send {
    /// Compile a module. `name` is the canonical path or reserved name.
    fn compile_module(&mut self, name: &str, source: &str) -> Result<CompiledModule, ScriptError>;

    /// Link a compiled module and its dependencies.
    ///
    /// `resolve` maps `(referrer, specifier)` to an already compiled module.
    fn instantiate_module(
        &mut self,
        module: ModuleKey,
        resolve: &mut dyn FnMut(ModuleKey, &str) -> Option<ModuleKey>,
    ) -> Result<(), ScriptError>;

    /// Run an instantiated module body
    fn evaluate_module(&mut self, module: ModuleKey) -> Evaluation;

    /// The exported bindings of an evaluated module
    fn module_namespace(&mut self, module: ModuleKey) -> ScriptValue;

    fn create_promise(&mut self) -> PromiseKey;

    fn resolve_promise(&mut self, promise: PromiseKey, value: ScriptValue);

    fn reject_promise(&mut self, promise: PromiseKey, error: ScriptError);

    fn promise_state(&self, promise: PromiseKey) -> PromiseState;

    /// Rejection events accumulated since the last call
    fn take_rejection_events(&mut self) -> Vec<RejectionEvent>;

    /// Call a retained function
    fn call_function(&mut self, function: FunctionKey, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError>;

    /// Drop the host's reference to a retained function
    fn release_function(&mut self, _function: FunctionKey) {}

    /// Run a classic script (console input, bootstrap snippets)
    fn execute_script(&mut self, name: &str, source: &str) -> Result<ScriptValue, ScriptError>;

    /// Do incremental collection work for at most `budget`.
    ///
    /// Returns true if more work remains.
    fn idle_notification(&mut self, _budget: Duration) -> bool {
        false
    }

    /// Drain the engine's microtask queue
    fn run_microtasks(&mut self) {}
}

//! A script engine that links module graphs without running code.
//!
//! It extracts static import specifiers and literal `export const` bindings
//! with regular expressions. That is enough to check that a program's module
//! graph resolves, and to drive the host headlessly.

use regex::Regex;
use serde_json::Map;

use super::{
    CompiledModule, Evaluation, FunctionKey, ModuleKey, PromiseKey, PromiseState, RejectionEvent,
    ScriptEngine, ScriptValue,
};
use crate::error::ScriptError;

struct LinkedModule {
    name: String,
    requests: Vec<String>,
    exports: Map<String, ScriptValue>,
    instantiated: bool,
    evaluated: bool,
    links: Vec<ModuleKey>,
}

/// Engine that understands imports and literal exports only
pub struct LinkOnlyEngine {
    modules: Vec<LinkedModule>,
    promises: Vec<PromiseState>,
    rejections: Vec<RejectionEvent>,
    import_pattern: Regex,
    export_pattern: Regex,
    default_pattern: Regex,
}

impl LinkOnlyEngine {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            promises: Vec::new(),
            rejections: Vec::new(),
            import_pattern: Regex::new(
                r#"(?m)^\s*(?:import|export)\s*(?:[^'";]*?\bfrom\s*)?['"]([^'"\n]+)['"]"#,
            )
            .expect("static import pattern"),
            export_pattern: Regex::new(
                r"(?m)^\s*export\s+(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(.+?);?\s*$",
            )
            .expect("static export pattern"),
            default_pattern: Regex::new(r"(?m)^\s*export\s+default\s+(.+?);?\s*$")
                .expect("static default pattern"),
        }
    }

    /// Number of modules compiled so far
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    fn module(&self, key: ModuleKey) -> Result<&LinkedModule, ScriptError> {
        self.modules
            .get(key.0 as usize)
            .ok_or_else(|| ScriptError::new(format!("ReferenceError: unknown {}", key)))
    }

    fn module_mut(&mut self, key: ModuleKey) -> Result<&mut LinkedModule, ScriptError> {
        self.modules
            .get_mut(key.0 as usize)
            .ok_or_else(|| ScriptError::new(format!("ReferenceError: unknown {}", key)))
    }

    fn link(
        &mut self,
        key: ModuleKey,
        resolve: &mut dyn FnMut(ModuleKey, &str) -> Option<ModuleKey>,
    ) -> Result<(), ScriptError> {
        let module = self.module_mut(key)?;
        if module.instantiated {
            return Ok(());
        }
        // Marked before recursing so cycles terminate.
        module.instantiated = true;
        let requests = module.requests.clone();

        let mut links = Vec::with_capacity(requests.len());
        for specifier in &requests {
            let Some(dep) = resolve(key, specifier) else {
                let module = self.module_mut(key)?;
                module.instantiated = false;
                return Err(ScriptError::new(format!(
                    "SyntaxError: Unable to resolve '{}' from '{}'",
                    specifier, module.name
                )));
            };
            links.push(dep);
            if let Err(err) = self.link(dep, resolve) {
                self.module_mut(key)?.instantiated = false;
                return Err(err);
            }
        }
        self.module_mut(key)?.links = links;
        Ok(())
    }

    fn evaluate(&mut self, key: ModuleKey) -> Result<(), ScriptError> {
        let module = self.module_mut(key)?;
        if module.evaluated {
            return Ok(());
        }
        if !module.instantiated {
            return Err(ScriptError::new(format!(
                "ReferenceError: module '{}' is not instantiated",
                module.name
            )));
        }
        module.evaluated = true;
        for dep in module.links.clone() {
            self.evaluate(dep)?;
        }
        Ok(())
    }

    fn promise_slot(&mut self, promise: PromiseKey) -> Option<&mut PromiseState> {
        self.promises.get_mut(promise.0 as usize)
    }
}

impl Default for LinkOnlyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn literal(text: &str) -> ScriptValue {
    serde_json::from_str(text.trim()).unwrap_or(ScriptValue::Null)
}

impl ScriptEngine for LinkOnlyEngine {
    fn compile_module(&mut self, name: &str, source: &str) -> Result<CompiledModule, ScriptError> {
        let requests: Vec<String> = self
            .import_pattern
            .captures_iter(source)
            .map(|caps| caps[1].to_string())
            .collect();

        let mut exports = Map::new();
        for caps in self.export_pattern.captures_iter(source) {
            exports.insert(caps[1].to_string(), literal(&caps[2]));
        }
        if let Some(caps) = self.default_pattern.captures(source) {
            exports.insert("default".to_string(), literal(&caps[1]));
        }

        let key = ModuleKey(self.modules.len() as u32);
        self.modules.push(LinkedModule {
            name: name.to_string(),
            requests: requests.clone(),
            exports,
            instantiated: false,
            evaluated: false,
            links: Vec::new(),
        });
        Ok(CompiledModule { key, requests })
    }

    fn instantiate_module(
        &mut self,
        module: ModuleKey,
        resolve: &mut dyn FnMut(ModuleKey, &str) -> Option<ModuleKey>,
    ) -> Result<(), ScriptError> {
        self.link(module, resolve)
    }

    fn evaluate_module(&mut self, module: ModuleKey) -> Evaluation {
        match self.evaluate(module) {
            Ok(()) => Evaluation::Fulfilled,
            Err(error) => Evaluation::Rejected {
                promise: None,
                error,
            },
        }
    }

    fn module_namespace(&mut self, module: ModuleKey) -> ScriptValue {
        match self.module(module) {
            Ok(m) => ScriptValue::Object(m.exports.clone()),
            Err(_) => ScriptValue::Null,
        }
    }

    fn create_promise(&mut self) -> PromiseKey {
        self.promises.push(PromiseState::Pending);
        PromiseKey(self.promises.len() as u64 - 1)
    }

    fn resolve_promise(&mut self, promise: PromiseKey, value: ScriptValue) {
        if let Some(state) = self.promise_slot(promise) {
            if state.is_pending() {
                *state = PromiseState::Fulfilled(value);
            }
        }
    }

    fn reject_promise(&mut self, promise: PromiseKey, error: ScriptError) {
        let Some(state) = self.promise_slot(promise) else {
            return;
        };
        if !state.is_pending() {
            return;
        }
        *state = PromiseState::Rejected(error.clone());
        // Script code never attaches handlers here.
        self.rejections
            .push(RejectionEvent::RejectedWithoutHandler { promise, error });
    }

    fn promise_state(&self, promise: PromiseKey) -> PromiseState {
        self.promises
            .get(promise.0 as usize)
            .cloned()
            .unwrap_or(PromiseState::Pending)
    }

    fn take_rejection_events(&mut self) -> Vec<RejectionEvent> {
        std::mem::take(&mut self.rejections)
    }

    fn call_function(&mut self, function: FunctionKey, _args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        Err(ScriptError::new(format!(
            "TypeError: function #{} cannot be called without a script runtime",
            function.0
        )))
    }

    fn execute_script(&mut self, _name: &str, source: &str) -> Result<ScriptValue, ScriptError> {
        serde_json::from_str(source.trim()).map_err(|_| {
            ScriptError::new("SyntaxError: only literal values can be evaluated without a script runtime")
        })
    }
}

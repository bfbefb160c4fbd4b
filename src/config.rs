//! Host configuration.
//!
//! Built from command-line flags, optionally layered over a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::host::DEFAULT_MODULE;

// ---------------------------------------------------------------------------
// HostConfig
// ---------------------------------------------------------------------------

/// Everything the main loop needs to start (and restart) a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Module loaded on start and on every reload.
    pub initial_module: String,
    /// Directory relative module paths and `<console>` imports resolve from.
    pub base_path: PathBuf,
    /// Arguments exposed to the script.
    pub args: Vec<String>,
    /// Running as a child with a pipe to the parent on descriptor 3.
    pub is_child_process: bool,
    /// No window; the headless platform drives the loop.
    pub headless: bool,
    /// Whether diagnostics are written (children may be started silent).
    pub log: bool,
    /// Background worker threads.
    pub worker_threads: usize,
    /// Budget for one incremental GC pass, in milliseconds.
    pub gc_idle_budget_ms: u64,
    /// Initial window width in pixels.
    pub window_width: u32,
    /// Initial window height in pixels.
    pub window_height: u32,
    /// Executable spawned for child processes (defaults to the current one).
    pub child_executable: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            initial_module: DEFAULT_MODULE.to_string(),
            base_path: PathBuf::from("."),
            args: Vec::new(),
            is_child_process: false,
            headless: false,
            log: true,
            worker_threads: 4,
            gc_idle_budget_ms: 10,
            window_width: 800,
            window_height: 600,
            child_executable: None,
        }
    }
}

impl HostConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::load(format!("Invalid config file '{}': {}", path.display(), e)))
    }

    /// Point the host at `module`, taking the base path from its directory.
    ///
    /// Reserved `--` names keep the current base path.
    pub fn with_module(mut self, module: &str) -> Self {
        if module.starts_with("--") {
            self.initial_module = module.to_string();
            return self;
        }
        let path = Path::new(module);
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                self.base_path = dir.to_path_buf();
                self.initial_module = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| module.to_string());
            }
            _ => self.initial_module = module.to_string(),
        }
        self
    }

    /// GC idle pass budget
    pub fn gc_idle_budget(&self) -> Duration {
        Duration::from_millis(self.gc_idle_budget_ms)
    }

    /// Executable used when spawning a child
    pub fn child_executable(&self) -> Result<PathBuf> {
        match &self.child_executable {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.initial_module, "--default");
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.gc_idle_budget(), Duration::from_millis(10));
        assert_eq!((config.window_width, config.window_height), (800, 600));
        assert!(config.log);
    }

    #[test]
    fn test_with_module_splits_base_path() {
        let config = HostConfig::default().with_module("games/pong/main.js");
        assert_eq!(config.base_path, PathBuf::from("games/pong"));
        assert_eq!(config.initial_module, "main.js");

        let config = HostConfig::default().with_module("main.js");
        assert_eq!(config.base_path, PathBuf::from("."));
        assert_eq!(config.initial_module, "main.js");

        let config = HostConfig::default().with_module("--console");
        assert_eq!(config.initial_module, "--console");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"worker_threads": 2, "headless": true}}"#).unwrap();
        let config = HostConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert!(config.headless);
        assert_eq!(config.window_width, 800);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(HostConfig::from_file(file.path()).is_err());
    }
}

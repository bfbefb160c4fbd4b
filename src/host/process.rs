//! Child processes and the pipe to the parent.
//!
//! Each process handle owns its [`PipeChannel`] and a listener table. Pipe
//! callbacks fire on the channel's thread and only post foreground tasks;
//! every listener runs on the script thread under the execution lock.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;
use serde_json::json;

use super::events::{EventKind, EventListeners};
use super::ScriptHost;
use crate::engine::{FunctionKey, ScriptEngine, ScriptValue};
use crate::error::{Error, Result, ScriptError};
use crate::ipc::{child_args, MessageType, OnClose, OnMessage, PipeChannel};

/// Handle to a spawned child, or to the parent of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process#{}", self.0)
    }
}

/// Console log levels, as named in forwarded `log` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
    /// Host diagnostics shown only in development builds
    Dev,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Dev => "dev",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ProcessEntry {
    /// Gone once the process exited or was closed
    pipe: Option<PipeChannel>,
    events: EventListeners,
    is_parent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ProcessTable {
    entries: HashMap<ProcessId, ProcessEntry>,
    next_id: u32,
    parent: Option<ProcessId>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, is_parent: bool) -> ProcessId {
        self.next_id += 1;
        let id = ProcessId(self.next_id);
        self.entries.insert(
            id,
            ProcessEntry {
                pipe: None,
                events: EventListeners::new(),
                is_parent,
            },
        );
        if is_parent {
            self.parent = Some(id);
        }
        id
    }

    fn parent_pipe(&self) -> Option<&PipeChannel> {
        let parent = self.parent?;
        self.entries.get(&parent)?.pipe.as_ref()
    }
}

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    // -----------------------------------------------------------------------
    // Parent side
    // -----------------------------------------------------------------------

    /// Start a child running `module` with `args`.
    ///
    /// The child's output is kept only if both this process and the caller
    /// ask for logging.
    pub fn spawn_process(
        &mut self,
        module: &str,
        args: &[String],
        headless: bool,
        log: bool,
    ) -> Result<ProcessId> {
        let exe = self.config.child_executable()?;
        let log = self.config.log && log;
        let argv = child_args(module, args, headless, log);

        let id = self.processes.insert(false);
        let (on_message, on_close) = self.pipe_callbacks(id);
        match PipeChannel::spawn(&exe, &argv, log, on_message, on_close) {
            Ok(pipe) => {
                tracing::debug!(%id, module, "spawned child");
                if let Some(entry) = self.processes.entries.get_mut(&id) {
                    entry.pipe = Some(pipe);
                }
                Ok(id)
            }
            Err(err) => {
                self.processes.entries.remove(&id);
                Err(err)
            }
        }
    }

    /// Close the pipe to a child. No `exit` event follows.
    pub fn close_process(&mut self, id: ProcessId) -> Result<()> {
        let Some(entry) = self.processes.entries.get_mut(&id) else {
            return Ok(());
        };
        if entry.pipe.is_none() {
            return Ok(());
        }
        if entry.is_parent {
            return Err(Error::CloseParent);
        }
        entry.pipe = None;
        tracing::debug!(%id, "closed child pipe");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Child side
    // -----------------------------------------------------------------------

    /// Open the pipe inherited from the parent and return its handle.
    ///
    /// The parent may only send `message` frames. When it closes the pipe
    /// this process quits with status 0.
    pub fn attach_to_parent(&mut self) -> Result<ProcessId> {
        if let Some(parent) = self.processes.parent {
            return Ok(parent);
        }
        let id = self.processes.insert(true);
        let (on_message, on_close) = self.pipe_callbacks(id);
        match PipeChannel::attach_to_parent(on_message, on_close) {
            Ok(pipe) => {
                if let Some(entry) = self.processes.entries.get_mut(&id) {
                    entry.pipe = Some(pipe);
                }
                Ok(id)
            }
            Err(err) => {
                self.processes.entries.remove(&id);
                self.processes.parent = None;
                Err(err)
            }
        }
    }

    /// Handle of the parent, once attached
    pub fn parent_process(&self) -> Option<ProcessId> {
        self.processes.parent
    }

    // -----------------------------------------------------------------------
    // Both sides
    // -----------------------------------------------------------------------

    /// Send `value` as a `message` frame
    pub fn post_message(&mut self, id: ProcessId, value: &ScriptValue) -> Result<()> {
        let pipe = self
            .processes
            .entries
            .get(&id)
            .and_then(|entry| entry.pipe.as_ref())
            .ok_or(Error::ConnectionClosed)?;
        let payload = serde_json::to_vec(value).map_err(|e| Error::Ipc(e.to_string()))?;
        pipe.send_message(MessageType::Message.as_u32(), &payload);
        Ok(())
    }

    pub fn add_process_listener(&mut self, id: ProcessId, name: &str, listener: FunctionKey) -> bool {
        match self.processes.entries.get_mut(&id) {
            Some(entry) => entry.events.add(name, listener),
            None => false,
        }
    }

    pub fn remove_process_listener(&mut self, id: ProcessId, name: &str, listener: FunctionKey) -> bool {
        let removed = match self.processes.entries.get_mut(&id) {
            Some(entry) => entry.events.remove(name, listener),
            None => false,
        };
        if removed {
            self.engine.release_function(listener);
        }
        removed
    }

    /// Whether the pipe to `id` is still open
    pub fn is_process_connected(&self, id: ProcessId) -> bool {
        self.processes
            .entries
            .get(&id)
            .map_or(false, |entry| entry.pipe.is_some())
    }

    // -----------------------------------------------------------------------
    // Console and exception forwarding
    // -----------------------------------------------------------------------

    /// Emit a console line: to the parent in a child, to `tracing` otherwise
    pub fn console_log(&mut self, level: LogLevel, message: &str) {
        if self.config.is_child_process {
            if let Some(pipe) = self.processes.parent_pipe() {
                let frame = json!({
                    "type": "log",
                    "message": message,
                    "level": level.as_str(),
                });
                pipe.send_message(MessageType::Log.as_u32(), frame.to_string().as_bytes());
                return;
            }
        }
        match level {
            LogLevel::Debug | LogLevel::Dev => tracing::debug!(target: "console", "{}", message),
            LogLevel::Log | LogLevel::Info => tracing::info!(target: "console", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "console", "{}", message),
            LogLevel::Error => tracing::error!(target: "console", "{}", message),
        }
    }

    pub(super) fn forward_exception_to_parent(&self, error: &ScriptError) {
        let Some(pipe) = self.processes.parent_pipe() else {
            return;
        };
        let stacktrace: Vec<String> = error.stack.iter().map(|frame| frame.to_string()).collect();
        let frame = json!({
            "type": "exception",
            "message": error.message,
            "stacktrace": stacktrace,
        });
        pipe.send_message(MessageType::Exception.as_u32(), frame.to_string().as_bytes());
    }

    // -----------------------------------------------------------------------
    // Pipe callbacks
    // -----------------------------------------------------------------------

    fn pipe_callbacks(&self, id: ProcessId) -> (OnMessage, OnClose) {
        let queue = Arc::clone(&self.task_queue);
        let weak = self.weak_handle();
        let on_message: OnMessage = Box::new(move |kind, payload| {
            let weak = weak.clone();
            queue.post(move |host: &mut ScriptHost<E>| {
                if let Some(host) = weak.resolve(host) {
                    host.handle_process_message(id, kind, &payload);
                }
            });
        });

        let queue = Arc::clone(&self.task_queue);
        let weak = self.weak_handle();
        let on_close: OnClose = Box::new(move |status, error| {
            queue.post(move |host: &mut ScriptHost<E>| {
                if let Some(host) = weak.resolve(host) {
                    host.handle_process_exit(id, status, error);
                }
            });
        });
        (on_message, on_close)
    }

    fn handle_process_message(&mut self, id: ProcessId, kind: u32, payload: &[u8]) {
        let Some(entry) = self.processes.entries.get(&id) else {
            return;
        };
        let event = match MessageType::from_u32(kind) {
            Some(MessageType::Message) => EventKind::Message,
            Some(MessageType::Log) if !entry.is_parent => EventKind::ChildLog,
            Some(MessageType::Exception) if !entry.is_parent => EventKind::ChildException,
            _ => {
                tracing::warn!(%id, kind, "ignoring unexpected frame type");
                return;
            }
        };
        let listeners = entry.events.listeners(event).to_vec();
        let value: ScriptValue = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                self.report_exception(&ScriptError::new(format!("SyntaxError: {}", e)));
                return;
            }
        };
        self.call_listeners(&listeners, &value);
    }

    fn handle_process_exit(&mut self, id: ProcessId, status: i32, error: String) {
        let Some(entry) = self.processes.entries.get_mut(&id) else {
            return;
        };
        if entry.is_parent {
            tracing::debug!("parent closed the pipe");
            entry.pipe = None;
            self.request_quit(0);
            return;
        }
        tracing::debug!(%id, status, "child exited");
        let listeners = entry.events.listeners(EventKind::ChildExit).to_vec();
        let mut event = json!({ "type": "exit", "status": status });
        if !error.is_empty() {
            event["error"] = ScriptValue::String(error);
        }
        self.call_listeners(&listeners, &event);
        if let Some(mut entry) = self.processes.entries.remove(&id) {
            for function in entry.events.remove_all() {
                self.engine.release_function(function);
            }
        }
    }
}

//! Framehost: the scheduling core of a scriptable desktop host
//!
//! A host runs one script program per process, gives it a window, and lets
//! it spawn child processes it can message. This crate is the machinery
//! underneath: a frame loop that interleaves input, timers, background work
//! and rendering on a single script thread.
//!
//! # Quick Start
//!
//! ```no_run
//! use framehost::{HeadlessPlatform, HostConfig, LinkOnlyEngine, MainLoop};
//!
//! fn main() -> framehost::Result<()> {
//!     let config = HostConfig::default().with_module("app/main.js");
//!     let mut main_loop = MainLoop::new(config, HeadlessPlatform::new(), LinkOnlyEngine::new)?;
//!     let code = main_loop.run_until_closed()?;
//!     std::process::exit(code);
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Scheduling** | [`tasks`], [`main_loop`] |
//! | **Threading** | [`sync`] |
//! | **Scripting** | [`engine`], [`host`] |
//! | **Processes** | [`ipc`] |
//! | **Window** | [`platform`] |
//! | **Setup** | [`config`], [`error`] |

#[cfg(not(unix))]
compile_error!("framehost passes pipe descriptors to child processes and supports Unix only");

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod ipc;
pub mod main_loop;
pub mod platform;
pub mod sync;
pub mod tasks;

pub use config::HostConfig;
pub use engine::{LinkOnlyEngine, ScriptEngine, ScriptValue};
pub use error::{Error, Result, ScriptError, StackFrame};
pub use host::{HostDelegate, HostQueue, ScriptHost};
pub use ipc::{MessageType, PipeChannel};
pub use main_loop::{LoopState, MainLoop};
pub use platform::{HeadlessHandle, HeadlessPlatform, Platform, WaitPolicy, WindowEvent};
pub use sync::{ExecutionLock, Signal, WeakHandle, WeakHandleFactory, WeakOwner};
pub use tasks::{NextTask, TaskQueue, ThreadPoolQueue};

/// Version of framehost
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

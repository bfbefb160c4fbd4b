//! Error types for the framehost runtime

use std::fmt;
use thiserror::Error;

/// A single frame in a script stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Function name (empty for top-level code)
    pub function_name: String,
    /// Script or module the frame belongs to (if known)
    pub file_name: Option<String>,
    /// Line number in source (1-indexed)
    pub line: u32,
}

impl StackFrame {
    /// Create a new stack frame
    pub fn new(function_name: impl Into<String>, line: u32) -> Self {
        Self {
            function_name: function_name.into(),
            file_name: None,
            line,
        }
    }

    /// Create a stack frame with file name
    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = if self.function_name.is_empty() {
            "<top>"
        } else {
            &self.function_name
        };
        match self.file_name {
            Some(ref file) => write!(f, "{} ({}:{})", function, file, self.line),
            None => write!(f, "{} (<script>:{})", function, self.line),
        }
    }
}

/// An exception raised by the script engine.
///
/// `can_continue` is false when the engine is unable to run further script
/// code (for example after termination); loops that invoke callbacks stop at
/// such an error instead of moving on to the next callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    /// Exception message as the script would print it
    pub message: String,
    /// Frames from innermost to outermost
    pub stack: Vec<StackFrame>,
    /// Whether the engine can keep executing script code
    pub can_continue: bool,
}

impl ScriptError {
    /// Create an exception with no stack
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            can_continue: true,
        }
    }

    /// Attach a stack trace
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    /// Mark the engine as unable to continue after this exception
    pub fn fatal(mut self) -> Self {
        self.can_continue = false;
        self
    }

    /// The stack trace rendered one frame per line
    pub fn stack_trace(&self) -> String {
        let mut out = String::new();
        for frame in &self.stack {
            out.push_str("    at ");
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.stack {
            write!(f, "\n    at {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Main error type for framehost
#[derive(Error, Debug)]
pub enum Error {
    /// Import specifier that is neither `./` nor `../` relative
    #[error("Invalid module name: '{0}'. Valid imports must begin with ./ or ../")]
    InvalidSpecifier(String),

    /// Reserved `--` name that does not name an embedded module
    #[error("Invalid module name: {0}")]
    InvalidModuleName(String),

    /// Compile, link or file error somewhere in a module graph
    #[error("{message}{}", render_breadcrumbs(breadcrumbs))]
    Load {
        message: String,
        /// Rendered `loading`/`from` lines, innermost first
        breadcrumbs: Vec<String>,
    },

    /// Exception thrown by script code
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Pipe protocol or channel failure
    #[error("IPCError: {0}")]
    Ipc(String),

    /// Child process could not be started
    #[error("SpawnError: {0}")]
    Spawn(String),

    /// Message posted to a process whose pipe is gone
    #[error("Connection closed.")]
    ConnectionClosed,

    /// Child attempted to close the pipe to its parent
    #[error("Child processes can't close their parent processes.")]
    CloseParent,

    /// Underlying I/O failure
    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),
}

fn render_breadcrumbs(breadcrumbs: &[String]) -> String {
    let mut out = String::new();
    for line in breadcrumbs {
        out.push('\n');
        out.push_str(line);
    }
    out
}

impl Error {
    /// Create a load error with no breadcrumbs yet
    pub fn load(message: impl Into<String>) -> Self {
        Error::Load {
            message: message.into(),
            breadcrumbs: Vec::new(),
        }
    }

    /// The exception a script observes for this error
    pub fn to_script_error(&self) -> ScriptError {
        match self {
            Error::Script(err) => err.clone(),
            other => ScriptError::new(other.to_string()),
        }
    }
}

/// Result type alias for framehost
pub type Result<T> = std::result::Result<T, Error>;

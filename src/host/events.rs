//! Script event listeners, indexed by event kind.

use std::fmt;
use std::str::FromStr;

use crate::engine::FunctionKey;

/// Every event a script can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    KeyPress,
    Click,
    MouseDown,
    MouseUp,
    MouseMove,
    MouseEnter,
    MouseLeave,
    Drop,
    Wheel,
    Focus,
    Blur,
    Resize,
    Maximize,
    Minimize,
    Restore,
    Close,
    /// Script-to-script message from another process
    Message,
    /// Log line forwarded by a child process
    ChildLog,
    /// Uncaught exception forwarded by a child process
    ChildException,
    /// A child process terminated
    ChildExit,
}

impl EventKind {
    /// Number of event kinds
    pub const COUNT: usize = 22;

    /// All kinds, in index order
    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::KeyPress,
        EventKind::Click,
        EventKind::MouseDown,
        EventKind::MouseUp,
        EventKind::MouseMove,
        EventKind::MouseEnter,
        EventKind::MouseLeave,
        EventKind::Drop,
        EventKind::Wheel,
        EventKind::Focus,
        EventKind::Blur,
        EventKind::Resize,
        EventKind::Maximize,
        EventKind::Minimize,
        EventKind::Restore,
        EventKind::Close,
        EventKind::Message,
        EventKind::ChildLog,
        EventKind::ChildException,
        EventKind::ChildExit,
    ];

    /// The name scripts register listeners with
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::KeyDown => "keydown",
            EventKind::KeyUp => "keyup",
            EventKind::KeyPress => "keypress",
            EventKind::Click => "click",
            EventKind::MouseDown => "mousedown",
            EventKind::MouseUp => "mouseup",
            EventKind::MouseMove => "mousemove",
            EventKind::MouseEnter => "mouseenter",
            EventKind::MouseLeave => "mouseleave",
            EventKind::Drop => "drop",
            EventKind::Wheel => "wheel",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::Resize => "resize",
            EventKind::Maximize => "maximize",
            EventKind::Minimize => "minimize",
            EventKind::Restore => "restore",
            EventKind::Close => "close",
            EventKind::Message => "message",
            EventKind::ChildLog => "log",
            EventKind::ChildException => "exception",
            EventKind::ChildExit => "exit",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| UnknownEvent(name.to_string()))
    }
}

/// Listener lists for one event target, one list per [`EventKind`]
#[derive(Debug, Clone)]
pub struct EventListeners {
    lists: [Vec<FunctionKey>; EventKind::COUNT],
}

impl EventListeners {
    pub fn new() -> Self {
        Self {
            lists: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Register `listener` by event name.
    ///
    /// Unknown names are ignored and return false. Adding the same listener
    /// twice keeps a single registration.
    pub fn add(&mut self, name: &str, listener: FunctionKey) -> bool {
        let Ok(kind) = name.parse::<EventKind>() else {
            return false;
        };
        let list = &mut self.lists[kind.index()];
        if !list.contains(&listener) {
            list.push(listener);
        }
        true
    }

    /// Unregister `listener`. Returns whether it was registered.
    pub fn remove(&mut self, name: &str, listener: FunctionKey) -> bool {
        let Ok(kind) = name.parse::<EventKind>() else {
            return false;
        };
        let list = &mut self.lists[kind.index()];
        let before = list.len();
        list.retain(|f| *f != listener);
        list.len() != before
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        !self.lists[kind.index()].is_empty()
    }

    /// Listeners for `kind`, in registration order
    pub fn listeners(&self, kind: EventKind) -> &[FunctionKey] {
        &self.lists[kind.index()]
    }

    /// Drop every registration, returning the released functions
    pub fn remove_all(&mut self) -> Vec<FunctionKey> {
        self.lists.iter_mut().flat_map(std::mem::take).collect()
    }
}

impl Default for EventListeners {
    fn default() -> Self {
        Self::new()
    }
}

//! Parent/child process messaging.
//!
//! A child is a copy of the current executable started with `--child`. Its
//! pipe end is inherited on a fixed descriptor and carries length-prefixed
//! frames whose type field is a [`MessageType`]; payloads are JSON.

mod frame;
mod pipe;

pub use frame::{encode_frame, Frame, FrameDecoder, HEADER_LEN};
pub use pipe::{OnClose, OnMessage, PipeChannel, CHILD_PIPE_FD};

use std::fmt;

/// Frame types exchanged between a parent and its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Script-to-script JSON payload
    Message = 0,
    /// `{type: "log", message, level}` from a child
    Log = 1,
    /// `{type: "exception", message, stacktrace}` from a child
    Exception = 2,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MessageType::Message),
            1 => Some(MessageType::Log),
            2 => Some(MessageType::Exception),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Message => "message",
            MessageType::Log => "log",
            MessageType::Exception => "exception",
        };
        f.write_str(name)
    }
}

/// Command-line arguments for a child running `module`.
///
/// Layout: `--child [--headless] [--no-log] <module> -- <args...>`.
pub fn child_args(module: &str, args: &[String], headless: bool, log: bool) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 5);
    out.push("--child".to_string());
    if headless {
        out.push("--headless".to_string());
    }
    if !log {
        out.push("--no-log".to_string());
    }
    out.push(module.to_string());
    out.push("--".to_string());
    out.extend(args.iter().cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_values() {
        for kind in [MessageType::Message, MessageType::Log, MessageType::Exception] {
            assert_eq!(MessageType::from_u32(kind.as_u32()), Some(kind));
        }
        assert_eq!(MessageType::from_u32(3), None);
        assert_eq!(MessageType::Exception.to_string(), "exception");
    }

    #[test]
    fn test_child_args_layout() {
        let args = child_args("worker.js", &["a".to_string(), "--b".to_string()], true, false);
        assert_eq!(
            args,
            vec!["--child", "--headless", "--no-log", "worker.js", "--", "a", "--b"]
        );
        assert_eq!(child_args("--default", &[], false, true), vec!["--child", "--default", "--"]);
    }
}

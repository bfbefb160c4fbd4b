//! Windowing platform boundary.
//!
//! The main loop never talks to a window system directly. A [`Platform`]
//! blocks for input according to a [`WaitPolicy`], reports window state and
//! presents frames; its [`Waker`] lets any thread interrupt a blocking wait.

mod headless;

pub use headless::{HeadlessHandle, HeadlessPlatform};

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::ScriptValue;
use crate::host::EventKind;
use crate::tasks::Waker;

/// How long [`Platform::wait`] may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return immediately with whatever input is queued
    Poll,
    /// Block until input, a wake, or the timeout
    Timeout(Duration),
    /// Block until input or a wake
    Indefinite,
}

/// A window system as seen by the main loop
pub trait Platform {
    /// Wait for input per `policy` and drain every queued event
    fn wait(&mut self, policy: WaitPolicy) -> Vec<WindowEvent>;

    /// Posts an empty event, making a blocked `wait` return. Callable from
    /// any thread.
    fn waker(&self) -> Waker;

    fn is_minimized(&self) -> bool;

    /// Whether the window wants to be redrawn every frame
    fn wants_frames(&self) -> bool;

    fn should_close(&self) -> bool;

    fn set_should_close(&mut self, close: bool);

    /// Present the current frame
    fn render_and_swap(&mut self);

    fn on_loading_start(&mut self) {}

    fn on_loading_finished(&mut self) {}

    fn set_title(&mut self, _title: &str) {}
}

bitflags! {
    /// Keyboard modifiers held during a key event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Repeat,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    Other(u8),
}

impl MouseButton {
    /// DOM button number
    pub fn index(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
            MouseButton::Other(n) => n,
        }
    }
}

/// Input delivered by a [`Platform`]
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    /// `key` is the printable key name, `code` the physical key, and
    /// `location` is 1 or 2 for left or right modifier keys
    Key {
        key: String,
        code: String,
        location: u8,
        action: KeyAction,
        mods: Modifiers,
    },
    /// A typed unicode code point
    Character(u32),
    MouseMove { x: f64, y: f64 },
    MouseButton {
        button: MouseButton,
        pressed: bool,
        x: f64,
        y: f64,
    },
    Wheel { dx: f64, dy: f64 },
    /// Cursor entered (true) or left the window
    MouseEnter(bool),
    /// Window gained (true) or lost focus
    Focus(bool),
    Resize { width: u32, height: u32 },
    Close,
    /// Files dropped onto the window
    Drop(Vec<String>),
    Maximize,
    Minimize,
    Restore,
}

impl WindowEvent {
    /// Whether this is the F5 reload shortcut
    pub fn is_reload_key(&self) -> bool {
        matches!(
            self,
            WindowEvent::Key { code, action: KeyAction::Press, .. } if code == "F5"
        )
    }

    /// Script events for this input, in dispatch order.
    ///
    /// A mouse button release yields `mouseup` followed by `click`.
    pub fn to_script_events(&self) -> Vec<(EventKind, ScriptValue)> {
        match self {
            WindowEvent::Key {
                key,
                code,
                location,
                action,
                mods,
            } => {
                let kind = match action {
                    KeyAction::Press | KeyAction::Repeat => EventKind::KeyDown,
                    KeyAction::Release => EventKind::KeyUp,
                };
                vec![(
                    kind,
                    json!({
                        "type": kind.as_str(),
                        "repeat": *action == KeyAction::Repeat,
                        "altKey": mods.contains(Modifiers::ALT),
                        "ctrlKey": mods.contains(Modifiers::CONTROL),
                        "metaKey": mods.contains(Modifiers::SUPER),
                        "shiftKey": mods.contains(Modifiers::SHIFT),
                        "location": location,
                        "key": key,
                        "code": code,
                    }),
                )]
            }
            WindowEvent::Character(codepoint) => vec![(
                EventKind::KeyPress,
                json!({ "type": "keypress", "code": codepoint }),
            )],
            WindowEvent::MouseMove { x, y } => vec![(
                EventKind::MouseMove,
                json!({
                    "type": "mousemove",
                    "x": x,
                    "y": y,
                    "clientX": x,
                    "clientY": y,
                    "offsetX": x,
                    "offsetY": y,
                }),
            )],
            WindowEvent::MouseButton {
                button,
                pressed,
                x,
                y,
            } => {
                let kinds: &[EventKind] = if *pressed {
                    &[EventKind::MouseDown]
                } else {
                    &[EventKind::MouseUp, EventKind::Click]
                };
                kinds
                    .iter()
                    .map(|&kind| {
                        (
                            kind,
                            json!({
                                "type": kind.as_str(),
                                "x": x,
                                "y": y,
                                "clientX": x,
                                "clientY": y,
                                "button": button.index(),
                            }),
                        )
                    })
                    .collect()
            }
            WindowEvent::Wheel { dx, dy } => vec![(
                EventKind::Wheel,
                json!({ "type": "wheel", "deltaX": dx, "deltaY": dy }),
            )],
            WindowEvent::MouseEnter(entered) => {
                let kind = if *entered {
                    EventKind::MouseEnter
                } else {
                    EventKind::MouseLeave
                };
                vec![(kind, plain(kind))]
            }
            WindowEvent::Focus(focused) => {
                let kind = if *focused {
                    EventKind::Focus
                } else {
                    EventKind::Blur
                };
                vec![(kind, plain(kind))]
            }
            WindowEvent::Resize { width, height } => vec![(
                EventKind::Resize,
                json!({ "type": "resize", "width": width, "height": height }),
            )],
            WindowEvent::Close => vec![(EventKind::Close, plain(EventKind::Close))],
            WindowEvent::Drop(files) => vec![(
                EventKind::Drop,
                json!({ "type": "drop", "files": files }),
            )],
            WindowEvent::Maximize => vec![(EventKind::Maximize, plain(EventKind::Maximize))],
            WindowEvent::Minimize => vec![(EventKind::Minimize, plain(EventKind::Minimize))],
            WindowEvent::Restore => vec![(EventKind::Restore, plain(EventKind::Restore))],
        }
    }
}

fn plain(kind: EventKind) -> ScriptValue {
    json!({ "type": kind.as_str() })
}

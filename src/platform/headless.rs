//! A window-less platform backed by a condition variable.
//!
//! Used for `--headless` children and for driving the main loop in tests:
//! events are injected through a [`HeadlessHandle`] from any thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use bitflags::bitflags;

use super::{Platform, WaitPolicy, WindowEvent};
use crate::sync::lock;
use crate::tasks::Waker;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct WindowState: u8 {
        const MINIMIZED = 1 << 0;
        const WANTS_FRAMES = 1 << 1;
        const SHOULD_CLOSE = 1 << 2;
        const LOADING = 1 << 3;
    }
}

#[derive(Debug, Default)]
struct Inbox {
    events: VecDeque<WindowEvent>,
    /// An empty event was posted since the last wait
    woken: bool,
    state: WindowState,
    last_policy: Option<WaitPolicy>,
}

#[derive(Debug, Default)]
struct Shared {
    inbox: Mutex<Inbox>,
    cond: Condvar,
    frames_rendered: AtomicU64,
}

impl Shared {
    fn post(&self, event: Option<WindowEvent>) {
        let mut inbox = lock(&self.inbox);
        match event {
            Some(event) => inbox.events.push_back(event),
            None => inbox.woken = true,
        }
        self.cond.notify_all();
    }

    fn set(&self, flag: WindowState, on: bool) {
        lock(&self.inbox).state.set(flag, on);
        self.cond.notify_all();
    }

    fn has(&self, flag: WindowState) -> bool {
        lock(&self.inbox).state.contains(flag)
    }
}

/// Platform with no window
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    shared: Arc<Shared>,
    title: String,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for injecting input from other threads
    pub fn handle(&self) -> HeadlessHandle {
        HeadlessHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Platform for HeadlessPlatform {
    fn wait(&mut self, policy: WaitPolicy) -> Vec<WindowEvent> {
        let mut inbox = lock(&self.shared.inbox);
        inbox.last_policy = Some(policy);
        let deadline = match policy {
            WaitPolicy::Poll => Some(Instant::now()),
            WaitPolicy::Timeout(timeout) => Some(Instant::now() + timeout),
            WaitPolicy::Indefinite => None,
        };
        while inbox.events.is_empty()
            && !inbox.woken
            && !inbox.state.contains(WindowState::SHOULD_CLOSE)
        {
            match deadline {
                None => {
                    inbox = self
                        .shared
                        .cond
                        .wait(inbox)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    inbox = self
                        .shared
                        .cond
                        .wait_timeout(inbox, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
            }
        }
        inbox.woken = false;
        inbox.events.drain(..).collect()
    }

    fn waker(&self) -> Waker {
        let shared = Arc::clone(&self.shared);
        Arc::new(move || shared.post(None))
    }

    fn is_minimized(&self) -> bool {
        self.shared.has(WindowState::MINIMIZED)
    }

    fn wants_frames(&self) -> bool {
        self.shared.has(WindowState::WANTS_FRAMES)
    }

    fn should_close(&self) -> bool {
        self.shared.has(WindowState::SHOULD_CLOSE)
    }

    fn set_should_close(&mut self, close: bool) {
        self.shared.set(WindowState::SHOULD_CLOSE, close);
    }

    fn render_and_swap(&mut self) {
        let frame = self.shared.frames_rendered.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(frame, "headless frame presented");
    }

    fn on_loading_start(&mut self) {
        self.shared.set(WindowState::LOADING, true);
    }

    fn on_loading_finished(&mut self) {
        self.shared.set(WindowState::LOADING, false);
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

/// Cross-thread control of a [`HeadlessPlatform`]
#[derive(Debug, Clone)]
pub struct HeadlessHandle {
    shared: Arc<Shared>,
}

impl HeadlessHandle {
    /// Queue an input event and wake the platform
    pub fn push_event(&self, event: WindowEvent) {
        self.shared.post(Some(event));
    }

    /// Post an empty event
    pub fn wake(&self) {
        self.shared.post(None);
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.shared.set(WindowState::MINIMIZED, minimized);
    }

    /// Ask for a frame every iteration, like an animating window
    pub fn set_wants_frames(&self, wants: bool) {
        self.shared.set(WindowState::WANTS_FRAMES, wants);
    }

    /// Ask the loop to exit, as the window's close button would after
    /// listeners declined to cancel
    pub fn request_close(&self) {
        self.shared.set(WindowState::SHOULD_CLOSE, true);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn is_loading(&self) -> bool {
        self.shared.has(WindowState::LOADING)
    }

    /// The policy passed to the most recent wait
    pub fn last_wait_policy(&self) -> Option<WaitPolicy> {
        lock(&self.shared.inbox).last_policy
    }
}

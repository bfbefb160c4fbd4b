//! Animation-frame callback bookkeeping.

use crate::engine::FunctionKey;

/// Callbacks requested for the next frame.
///
/// Ids are handed out sequentially. Taking a batch moves `base_id` past
/// every id issued so far, so cancelling an id that already ran (or that
/// was never issued) is a no-op, and callbacks requested while a batch is
/// running wait for the following frame.
#[derive(Debug, Default)]
pub(crate) struct AnimationFrames {
    callbacks: Vec<(u32, FunctionKey)>,
    base_id: u32,
    next_id: u32,
}

impl AnimationFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, callback: FunctionKey) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.callbacks.push((id, callback));
        id
    }

    /// Remove a pending callback, returning it so the caller can release it
    pub fn cancel(&mut self, id: u32) -> Option<FunctionKey> {
        if id < self.base_id || id >= self.next_id {
            return None;
        }
        let index = self.callbacks.iter().position(|(pending, _)| *pending == id)?;
        Some(self.callbacks.remove(index).1)
    }

    /// Take every pending callback for this frame
    pub fn take_batch(&mut self) -> Vec<(u32, FunctionKey)> {
        self.base_id = self.next_id;
        std::mem::take(&mut self.callbacks)
    }

    pub fn has_pending(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// Drop all pending callbacks
    pub fn clear(&mut self) -> Vec<FunctionKey> {
        self.base_id = self.next_id;
        self.callbacks.drain(..).map(|(_, f)| f).collect()
    }
}

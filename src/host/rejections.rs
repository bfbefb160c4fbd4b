//! Unhandled promise rejection bookkeeping.

use crate::engine::{PromiseKey, RejectionEvent};
use crate::error::ScriptError;

/// Rejections with no handler, waiting for the end-of-frame report.
///
/// A handler attached before the report removes the entry, so a promise
/// that is caught late within the same frame is never reported.
#[derive(Debug, Default)]
pub(crate) struct RejectionTracker {
    pending: Vec<(PromiseKey, ScriptError)>,
}

impl RejectionTracker {
    pub fn absorb(&mut self, events: Vec<RejectionEvent>) {
        for event in events {
            match event {
                RejectionEvent::RejectedWithoutHandler { promise, error } => {
                    self.pending.push((promise, error));
                }
                RejectionEvent::HandlerAddedAfterReject { promise } => self.forget(promise),
            }
        }
    }

    pub fn forget(&mut self, promise: PromiseKey) {
        self.pending.retain(|(p, _)| *p != promise);
    }

    pub fn take(&mut self) -> Vec<ScriptError> {
        self.pending.drain(..).map(|(_, error)| error).collect()
    }
}

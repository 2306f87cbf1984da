//! Whether the next task resumes the agent's previous session.
//!
//! Starts inactive, becomes active after the first successful task and stays so until restart.
//! Nothing is persisted.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct ConversationState {
    active: AtomicBool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Continuation flag for the next task. `start_fresh` forces a new session for this call only.
    pub fn continuation(&self, start_fresh: bool) -> bool {
        !start_fresh && self.is_active()
    }

    /// Record a successful task; later tasks continue its session.
    pub fn mark_active(&self) {
        self.active.store(true, Ordering::SeqCst);
    }
}

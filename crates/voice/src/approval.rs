//! Pending approval with exactly-once resolution.
//!
//! Voice keywords and UI clicks can race to resolve the same approval;
//! the guard lives here, next to the resolver, so only the first
//! arrival is honored.

use std::sync::atomic::{AtomicBool, Ordering};

/// One approval hold: the instruction being reviewed plus a
/// resolve-once flag.
#[derive(Debug)]
pub struct PendingApproval {
    /// The tool call id awaiting a response.
    pub tool_id: String,
    pub instruction: String,
    resolved: AtomicBool,
}

impl PendingApproval {
    pub fn new(tool_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            instruction: instruction.into(),
            resolved: AtomicBool::new(false),
        }
    }

    /// Claim the resolution. Returns `true` for the first caller only;
    /// every later call is a double-fire and must be ignored.
    pub fn try_resolve(&self) -> bool {
        !self.resolved.swap(true, Ordering::SeqCst)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

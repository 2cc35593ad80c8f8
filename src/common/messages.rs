//! Canonical message types for bridge communication.
//!
//! These are the values that cross from the blocking game-session threads
//! into the gateway event loop.

use chrono::{DateTime, Utc};

/// One parsed chat line from the game world, pending relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFragment {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChatFragment {
    /// Create a fragment stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Newline-joined text of up to one tick's worth of fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainBatch {
    /// Each fragment's text followed by `\n`, in queue order.
    pub text: String,
    /// Number of fragments folded into `text`.
    pub fragments: usize,
}

/// Work submitted from the game-session domain to the gateway event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayTask {
    /// Post a drained batch to the destination channel.
    Deliver(DrainBatch),
    /// The game connection of a session closed without a disconnect request.
    SessionLost { session_id: u64, reason: String },
}

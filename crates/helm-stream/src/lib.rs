//! Ordered-log transport for command consumption and state publication.
//!
//! The [`CommandLog`] trait captures the Redis-Streams-shaped semantics the
//! consumer relies on: consumer groups, per-message acknowledgment, a
//! pending-entries list with idle-based reclaim, and capped appends.
//! [`MemoryLog`] implements it in-process; a networked backend implements
//! the same trait out of tree.

pub mod error;
pub mod log;
pub mod memory;

pub use error::StreamError;
pub use log::{CommandLog, MessageId, PendingInfo, StreamMessage};
pub use memory::MemoryLog;

use helm_core::SessionId;

/// Inbound stream key for a session's commands.
pub fn command_stream_key(session_id: &SessionId) -> String {
    format!("commands:{session_id}")
}

/// Outbound stream key for a session's state updates.
pub fn state_stream_key(session_id: &SessionId) -> String {
    format!("state:{session_id}")
}

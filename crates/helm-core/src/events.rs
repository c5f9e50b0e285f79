use serde::{Deserialize, Serialize};

use crate::ids::{CommandId, SessionId};

/// Lifecycle events emitted by a command consumer on its broadcast channel.
/// Observability only: the protocol's source of truth is the outbound
/// state-update stream, not these.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConsumerEvent {
    #[serde(rename = "consumer_started")]
    ConsumerStarted { session_id: SessionId },

    #[serde(rename = "command_processed")]
    CommandProcessed {
        session_id: SessionId,
        command_id: CommandId,
        sequence_number: u64,
        success: bool,
    },

    #[serde(rename = "duplicate_dropped")]
    DuplicateDropped {
        session_id: SessionId,
        command_id: CommandId,
        sequence_number: u64,
    },

    #[serde(rename = "sequence_gap")]
    SequenceGap {
        session_id: SessionId,
        expected: u64,
        received: u64,
    },

    #[serde(rename = "messages_reclaimed")]
    MessagesReclaimed {
        session_id: SessionId,
        count: usize,
    },

    #[serde(rename = "consumer_stopped")]
    ConsumerStopped { session_id: SessionId },
}

impl ConsumerEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ConsumerStarted { session_id }
            | Self::CommandProcessed { session_id, .. }
            | Self::DuplicateDropped { session_id, .. }
            | Self::SequenceGap { session_id, .. }
            | Self::MessagesReclaimed { session_id, .. }
            | Self::ConsumerStopped { session_id } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConsumerStarted { .. } => "consumer_started",
            Self::CommandProcessed { .. } => "command_processed",
            Self::DuplicateDropped { .. } => "duplicate_dropped",
            Self::SequenceGap { .. } => "sequence_gap",
            Self::MessagesReclaimed { .. } => "messages_reclaimed",
            Self::ConsumerStopped { .. } => "consumer_stopped",
        }
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StreamError;

/// Identifier of one log entry, ordered within its stream.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One entry as delivered to a consumer: id plus flat key/value fields.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMessage {
    pub id: MessageId,
    pub fields: Vec<(String, String)>,
}

/// One pending-entries-list record, for introspection and tests.
#[derive(Clone, Debug)]
pub struct PendingInfo {
    pub id: MessageId,
    pub consumer: String,
    pub delivery_count: u32,
    pub idle: Duration,
}

/// At-least-once ordered log with consumer-group semantics.
///
/// Contract (Redis Streams `XGROUP`/`XADD`/`XREADGROUP`/`XAUTOCLAIM`/`XACK`
/// shaped): each entry is delivered to exactly one live member of a group
/// at a time; delivered-but-unacknowledged entries sit in the group's
/// pending-entries list until acknowledged or reclaimed.
#[async_trait]
pub trait CommandLog: Send + Sync {
    /// Create `group` on `stream` if it does not exist. Idempotent; creates
    /// the stream as a side effect when missing.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError>;

    /// Append an entry. When `maxlen` is set the stream is trimmed to
    /// approximately that many entries, oldest first.
    async fn append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
        maxlen: Option<u64>,
    ) -> Result<MessageId, StreamError>;

    /// Read up to `count` entries not yet delivered to any member of
    /// `group`, blocking up to `block` when none are available. Delivered
    /// entries enter the pending-entries list under `consumer`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Take ownership of pending entries idle for at least `min_idle`
    /// (whoever their previous owner was) and return them for reprocessing.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Acknowledge an entry, removing it from the pending-entries list.
    /// Acknowledging an entry that is not pending is a no-op.
    async fn ack(&self, stream: &str, group: &str, id: &MessageId) -> Result<(), StreamError>;

    /// Current pending-entries list of `group`.
    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingInfo>, StreamError>;

    /// Number of entries currently retained in `stream`.
    async fn len(&self, stream: &str) -> Result<usize, StreamError>;
}

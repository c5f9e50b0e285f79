//! State-update publication to the outbound log.
//!
//! Publication is best-effort: the consumer logs and swallows failures so
//! a broken outbound stream never blocks command acknowledgment.

use std::sync::Arc;

use helm_core::StateUpdateEnvelope;
use helm_stream::{state_stream_key, CommandLog, MessageId};

use crate::error::EngineError;

pub struct StatePublisher {
    log: Arc<dyn CommandLog>,
    maxlen: u64,
}

impl StatePublisher {
    pub fn new(log: Arc<dyn CommandLog>, maxlen: u64) -> Self {
        Self { log, maxlen }
    }

    /// Append the JSON-encoded envelope to `state:{session_id}`, trimming
    /// the stream to roughly `maxlen` entries.
    pub async fn publish(&self, update: &StateUpdateEnvelope) -> Result<MessageId, EngineError> {
        let payload = serde_json::to_string(update)?;
        let id = self
            .log
            .append(
                &state_stream_key(&update.session_id),
                vec![("payload".to_string(), payload)],
                Some(self.maxlen),
            )
            .await?;
        Ok(id)
    }
}

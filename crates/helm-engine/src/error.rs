use helm_core::SessionId;
use helm_stream::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] StreamError),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

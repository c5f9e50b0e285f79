/// Transport-level failures.
///
/// The consumer treats any of these on its read/claim path as fatal for the
/// affected session's loop: it logs and stops rather than busy-looping
/// against a broken backend.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no such consumer group `{group}` on stream `{stream}`")]
    NoSuchGroup { stream: String, group: String },

    #[error("transport backend error: {0}")]
    Backend(String),
}

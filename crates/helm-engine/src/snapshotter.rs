//! Session-state capture boundary.
//!
//! The snapshotter is the adapter onto the live resource (a DOM or
//! accessibility tree in the browser case). The engine only requires that
//! captures have deterministic shapes and that unchanged elements keep
//! their indices across consecutive captures.

use async_trait::async_trait;
use parking_lot::Mutex;

use helm_core::{SessionId, StateSnapshot};

use crate::registry::SessionHandle;

#[derive(Clone, Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("capture failed: {0}")]
    Capture(String),
}

#[async_trait]
pub trait StateSnapshotter: Send + Sync {
    async fn capture(&self, session: &SessionHandle) -> Result<StateSnapshot, SnapshotError>;
}

/// Test double that returns queued snapshots in order, then clones of the
/// last one. Lets protocol tests script the pre/post captures around an
/// execution.
pub struct StaticSnapshotter {
    queue: Mutex<Vec<StateSnapshot>>,
    last: Mutex<Option<StateSnapshot>>,
}

impl StaticSnapshotter {
    pub fn new(snapshots: Vec<StateSnapshot>) -> Self {
        Self {
            queue: Mutex::new(snapshots),
            last: Mutex::new(None),
        }
    }

    /// Always returns clones of one fixed snapshot.
    pub fn fixed(snapshot: StateSnapshot) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            last: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl StateSnapshotter for StaticSnapshotter {
    async fn capture(&self, session: &SessionHandle) -> Result<StateSnapshot, SnapshotError> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return self
                .last
                .lock()
                .clone()
                .ok_or_else(|| SnapshotError::SessionNotFound(session.session_id.clone()));
        }
        let snapshot = queue.remove(0);
        *self.last.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }
}

/// Test double whose captures always fail.
pub struct FailingSnapshotter;

#[async_trait]
impl StateSnapshotter for FailingSnapshotter {
    async fn capture(&self, _session: &SessionHandle) -> Result<StateSnapshot, SnapshotError> {
        Err(SnapshotError::Capture("capture unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(label: &str) -> StateSnapshot {
        StateSnapshot {
            resource_id: "page".into(),
            label: label.into(),
            elements: BTreeMap::new(),
            scalar_fields: BTreeMap::new(),
            captured_at: chrono::Utc::now(),
        }
    }

    fn handle() -> SessionHandle {
        SessionHandle {
            session_id: SessionId::from_raw("sess_1"),
            resource_id: "page".into(),
            label: "test".into(),
        }
    }

    #[tokio::test]
    async fn static_snapshotter_plays_queue_then_repeats_last() {
        let snapshotter = StaticSnapshotter::new(vec![snapshot("a"), snapshot("b")]);
        let h = handle();
        assert_eq!(snapshotter.capture(&h).await.unwrap().label, "a");
        assert_eq!(snapshotter.capture(&h).await.unwrap().label, "b");
        assert_eq!(snapshotter.capture(&h).await.unwrap().label, "b");
    }

    #[tokio::test]
    async fn fixed_snapshotter_repeats() {
        let snapshotter = StaticSnapshotter::fixed(snapshot("only"));
        let h = handle();
        assert_eq!(snapshotter.capture(&h).await.unwrap().label, "only");
        assert_eq!(snapshotter.capture(&h).await.unwrap().label, "only");
    }

    #[tokio::test]
    async fn failing_snapshotter_fails() {
        let result = FailingSnapshotter.capture(&handle()).await;
        assert!(matches!(result, Err(SnapshotError::Capture(_))));
    }
}

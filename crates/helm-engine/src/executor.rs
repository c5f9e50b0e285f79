//! Action execution boundary.
//!
//! The executor interprets an action against the live session. It is an
//! external collaborator from the protocol's point of view: it never
//! panics and never errors out-of-band — every failure comes back as a
//! `success = false` [`ActionResult`].

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use helm_core::{ActionRequest, ActionResult, SessionId};

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, session_id: &SessionId, action: &ActionRequest) -> ActionResult;
}

/// Scripted executor for deterministic tests: returns queued results in
/// order (success once the script runs out) and records every invocation.
#[derive(Default)]
pub struct MockExecutor {
    results: Mutex<Vec<ActionResult>>,
    calls: Mutex<Vec<(SessionId, ActionRequest)>>,
    call_count: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: Vec<ActionResult>) -> Self {
        Self {
            results: Mutex::new(results),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<(SessionId, ActionRequest)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, session_id: &SessionId, action: &ActionRequest) -> ActionResult {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push((session_id.clone(), action.clone()));
        let mut results = self.results.lock();
        if results.is_empty() {
            ActionResult::ok()
        } else {
            results.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_scripted_results_then_ok() {
        let executor = MockExecutor::with_results(vec![ActionResult::failed("nope")]);
        let sid = SessionId::from_raw("sess_1");

        let first = executor.execute(&sid, &ActionRequest::Back).await;
        assert!(!first.success);
        let second = executor.execute(&sid, &ActionRequest::Back).await;
        assert!(second.success);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let executor = MockExecutor::new();
        let sid = SessionId::from_raw("sess_1");
        let action = ActionRequest::Navigate { url: "/next".into() };
        executor.execute(&sid, &action).await;

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, sid);
        assert_eq!(calls[0].1, action);
    }
}

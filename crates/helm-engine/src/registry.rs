//! Session registry boundary.
//!
//! Constructor-injected store mapping a session id to its live handle; the
//! consumer refuses to start a loop for a session the store does not know.

use dashmap::DashMap;

use helm_core::SessionId;

/// Handle onto a live session's execution context.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    /// Identifier of the controlled resource (e.g. the page/target id).
    pub resource_id: String,
    pub label: String,
}

pub trait SessionStore: Send + Sync {
    fn lookup(&self, session_id: &SessionId) -> Option<SessionHandle>;
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.session_id.clone(), handle);
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn lookup(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: &str) -> SessionHandle {
        SessionHandle {
            session_id: SessionId::from_raw(raw),
            resource_id: format!("page-{raw}"),
            label: "Test".into(),
        }
    }

    #[test]
    fn lookup_after_insert() {
        let store = MemorySessionStore::new();
        store.insert(handle("sess_1"));
        let found = store.lookup(&SessionId::from_raw("sess_1")).unwrap();
        assert_eq!(found.resource_id, "page-sess_1");
    }

    #[test]
    fn lookup_unknown_is_none() {
        let store = MemorySessionStore::new();
        assert!(store.lookup(&SessionId::from_raw("sess_missing")).is_none());
    }

    #[test]
    fn remove_evicts() {
        let store = MemorySessionStore::new();
        store.insert(handle("sess_1"));
        assert!(store.remove(&SessionId::from_raw("sess_1")).is_some());
        assert!(store.lookup(&SessionId::from_raw("sess_1")).is_none());
        assert!(store.is_empty());
    }
}

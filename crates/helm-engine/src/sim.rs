//! Deterministic simulated sessions.
//!
//! A `SimWorld` hosts small in-memory "pages" whose executor and
//! snapshotter implement the engine's boundary traits, so the full consume
//! pipeline can be driven end-to-end in tests and in the sandbox binary
//! without a real browser.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map};

use helm_core::snapshot::{ElementDescriptor, StateSnapshot};
use helm_core::{ActionRequest, ActionResult, SessionId};

use crate::executor::ActionExecutor;
use crate::registry::{SessionHandle, SessionStore};
use crate::snapshotter::{SnapshotError, StateSnapshotter};

struct SimPage {
    url: String,
    history: Vec<String>,
    scroll_y: f64,
    elements: BTreeMap<u32, ElementDescriptor>,
    next_index: u32,
}

impl SimPage {
    fn open(url: &str) -> Self {
        let elements = page_elements_for(url);
        let next_index = elements.keys().max().map_or(0, |max| max + 1);
        Self {
            url: url.to_string(),
            history: Vec::new(),
            scroll_y: 0.0,
            elements,
            next_index,
        }
    }

    fn load(&mut self, url: &str) {
        self.elements = page_elements_for(url);
        self.next_index = self.elements.keys().max().map_or(0, |max| max + 1);
        self.url = url.to_string();
        self.scroll_y = 0.0;
    }

    fn find_index(&self, selector: &str) -> Option<u32> {
        self.elements
            .iter()
            .find(|(_, el)| el.selector == selector)
            .map(|(index, _)| *index)
    }

    fn apply(&mut self, action: &ActionRequest) -> ActionResult {
        match action {
            ActionRequest::Navigate { url } => {
                self.history.push(self.url.clone());
                self.load(url);
                let mut data = Map::new();
                data.insert("url".to_string(), json!(url));
                ActionResult::ok_with_data(data)
            }
            ActionRequest::Click { selector } => {
                let Some(index) = self.find_index(selector) else {
                    return ActionResult::failed(format!("element not found: {selector}"));
                };
                if selector.contains("open") {
                    let modal_index = self.next_index;
                    self.next_index += 2;
                    self.elements.insert(
                        modal_index,
                        ElementDescriptor {
                            selector: "#modal".into(),
                            kind: "dialog".into(),
                            text_excerpt: "Are you sure?".into(),
                            attributes: [("class".to_string(), "modal overlay".to_string())]
                                .into_iter()
                                .collect(),
                            bounds: None,
                        },
                    );
                    self.elements
                        .insert(modal_index + 1, element("#modal-close", "button", "Close"));
                } else if selector.contains("close") {
                    for sel in ["#modal", "#modal-close"] {
                        if let Some(idx) = self.find_index(sel) {
                            self.elements.remove(&idx);
                        }
                    }
                } else if let Some(el) = self.elements.get_mut(&index) {
                    el.attributes.insert("data-clicked".into(), "true".into());
                }
                ActionResult::ok()
            }
            ActionRequest::TypeText { selector, text } => {
                let Some(index) = self.find_index(selector) else {
                    return ActionResult::failed(format!("element not found: {selector}"));
                };
                if let Some(el) = self.elements.get_mut(&index) {
                    el.text_excerpt = text.clone();
                }
                ActionResult::ok()
            }
            ActionRequest::Scroll { delta_y, .. } => {
                self.scroll_y = (self.scroll_y + delta_y).max(0.0);
                ActionResult::ok()
            }
            ActionRequest::Back => match self.history.pop() {
                Some(previous) => {
                    self.load(&previous);
                    ActionResult::ok()
                }
                None => ActionResult::failed("no history to go back to"),
            },
            ActionRequest::Screenshot => {
                let mut data = Map::new();
                data.insert("format".to_string(), json!("png"));
                data.insert("url".to_string(), json!(self.url));
                ActionResult::ok_with_data(data)
            }
            ActionRequest::Custom { action_type, .. } => {
                ActionResult::failed(format!("unsupported action: {action_type}"))
            }
        }
    }

    fn snapshot(&self, session_id: &SessionId) -> StateSnapshot {
        let mut scalar_fields = BTreeMap::new();
        scalar_fields.insert("url".to_string(), json!(self.url));
        scalar_fields.insert("scroll_y".to_string(), json!(self.scroll_y));
        StateSnapshot {
            resource_id: format!("page-{session_id}"),
            label: page_title(&self.url),
            elements: self.elements.clone(),
            scalar_fields,
            captured_at: chrono::Utc::now(),
        }
    }
}

fn element(selector: &str, kind: &str, text: &str) -> ElementDescriptor {
    ElementDescriptor {
        selector: selector.into(),
        kind: kind.into(),
        text_excerpt: text.into(),
        attributes: BTreeMap::new(),
        bounds: None,
    }
}

/// Fixed element sets per url, so navigations are reproducible.
fn page_elements_for(url: &str) -> BTreeMap<u32, ElementDescriptor> {
    let mut elements = BTreeMap::new();
    elements.insert(0, element("#nav-home", "link", "Home"));
    elements.insert(1, element("#main", "div", &format!("Content of {url}")));
    if url.contains("login") {
        elements.insert(2, element("#login-form", "form", ""));
        elements.insert(3, element("#username", "input", ""));
        elements.insert(4, element("#open-help", "button", "Help"));
    } else {
        elements.insert(2, element("#open-details", "button", "Details"));
    }
    elements
}

fn page_title(url: &str) -> String {
    url.trim_start_matches('/').replace('/', " / ")
}

/// Shared world of simulated pages. Doubles as the session store.
#[derive(Default)]
pub struct SimWorld {
    pages: DashMap<SessionId, Arc<Mutex<SimPage>>>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session viewing `url` and return its handle.
    pub fn add_session(&self, session_id: SessionId, url: &str) -> SessionHandle {
        let page = SimPage::open(url);
        let handle = SessionHandle {
            session_id: session_id.clone(),
            resource_id: format!("page-{session_id}"),
            label: page_title(url),
        };
        self.pages.insert(session_id, Arc::new(Mutex::new(page)));
        handle
    }

    fn page(&self, session_id: &SessionId) -> Option<Arc<Mutex<SimPage>>> {
        self.pages.get(session_id).map(|p| p.clone())
    }

    /// Current url of a session (tests and the sandbox display).
    pub fn current_url(&self, session_id: &SessionId) -> Option<String> {
        self.page(session_id).map(|page| page.lock().url.clone())
    }
}

impl SessionStore for SimWorld {
    fn lookup(&self, session_id: &SessionId) -> Option<SessionHandle> {
        let page = self.page(session_id)?;
        let url = page.lock().url.clone();
        Some(SessionHandle {
            session_id: session_id.clone(),
            resource_id: format!("page-{session_id}"),
            label: page_title(&url),
        })
    }
}

/// Executor over a [`SimWorld`].
pub struct SimExecutor {
    world: Arc<SimWorld>,
}

impl SimExecutor {
    pub fn new(world: Arc<SimWorld>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl ActionExecutor for SimExecutor {
    async fn execute(&self, session_id: &SessionId, action: &ActionRequest) -> ActionResult {
        match self.world.page(session_id) {
            Some(page) => page.lock().apply(action),
            None => ActionResult::failed(format!("unknown session: {session_id}")),
        }
    }
}

/// Snapshotter over a [`SimWorld`].
pub struct SimSnapshotter {
    world: Arc<SimWorld>,
}

impl SimSnapshotter {
    pub fn new(world: Arc<SimWorld>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl StateSnapshotter for SimSnapshotter {
    async fn capture(&self, session: &SessionHandle) -> Result<StateSnapshot, SnapshotError> {
        match self.world.page(&session.session_id) {
            Some(page) => Ok(page.lock().snapshot(&session.session_id)),
            None => Err(SnapshotError::SessionNotFound(session.session_id.clone())),
        }
    }
}

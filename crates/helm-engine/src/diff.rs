//! Keyed-set diff over state snapshots, with derived semantic events.
//!
//! Pure computation: no I/O, no locks. Element maps are compared by index
//! key (the snapshotter guarantees index stability for unchanged elements),
//! scalars field by field. Semantic events come from a registry of
//! classifier functions evaluated in registration order — the engine ships
//! navigation / overlay / form defaults but hard-codes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use helm_core::diff::{
    FieldChange, ModifiedElement, RemovedElement, ScalarChange, SemanticEvent, SemanticEventType,
    StateDiff,
};
use helm_core::snapshot::{ElementDescriptor, StateSnapshot};

/// A semantic-event classifier. Receives the raw diff (without events) and
/// returns whatever higher-level events it recognizes.
pub type Classifier = Arc<dyn Fn(&StateDiff) -> Vec<SemanticEvent> + Send + Sync>;

pub struct StateDiffEngine {
    classifiers: Vec<Classifier>,
}

impl StateDiffEngine {
    /// Engine with no classifiers: raw structural diffs only.
    pub fn new() -> Self {
        Self {
            classifiers: Vec::new(),
        }
    }

    /// Engine with the built-in navigation / overlay / form classifiers.
    pub fn with_default_classifiers() -> Self {
        let mut engine = Self::new();
        engine.register(Arc::new(classify_navigation));
        engine.register(Arc::new(classify_overlay_appeared));
        engine.register(Arc::new(classify_form_vanished));
        engine
    }

    /// Append a classifier. Evaluation order is registration order; results
    /// are concatenated.
    pub fn register(&mut self, classifier: Classifier) {
        self.classifiers.push(classifier);
    }

    pub fn classifier_count(&self) -> usize {
        self.classifiers.len()
    }

    /// Structured diff from `pre` to `post`. The two snapshots must come
    /// from the same session; element indices are only comparable there.
    pub fn diff(&self, pre: &StateSnapshot, post: &StateSnapshot) -> StateDiff {
        let mut elements_added = BTreeMap::new();
        let mut elements_removed = BTreeMap::new();
        let mut elements_modified = BTreeMap::new();

        for (index, descriptor) in &post.elements {
            match pre.elements.get(index) {
                None => {
                    elements_added.insert(*index, descriptor.clone());
                }
                Some(previous) => {
                    let changes = element_changes(previous, descriptor);
                    if !changes.is_empty() {
                        elements_modified.insert(
                            *index,
                            ModifiedElement {
                                selector: descriptor.selector.clone(),
                                changes,
                            },
                        );
                    }
                }
            }
        }

        for (index, descriptor) in &pre.elements {
            if !post.elements.contains_key(index) {
                elements_removed.insert(
                    *index,
                    RemovedElement {
                        selector: descriptor.selector.clone(),
                        kind: descriptor.kind.clone(),
                    },
                );
            }
        }

        let mut scalar_changes = BTreeMap::new();
        for (field, new_value) in &post.scalar_fields {
            match pre.scalar_fields.get(field) {
                Some(old_value) if old_value == new_value => {}
                Some(old_value) => {
                    scalar_changes.insert(
                        field.clone(),
                        ScalarChange {
                            old: old_value.clone(),
                            new: new_value.clone(),
                        },
                    );
                }
                None => {
                    scalar_changes.insert(
                        field.clone(),
                        ScalarChange {
                            old: serde_json::Value::Null,
                            new: new_value.clone(),
                        },
                    );
                }
            }
        }
        for (field, old_value) in &pre.scalar_fields {
            if !post.scalar_fields.contains_key(field) {
                scalar_changes.insert(
                    field.clone(),
                    ScalarChange {
                        old: old_value.clone(),
                        new: serde_json::Value::Null,
                    },
                );
            }
        }

        let mut diff = StateDiff {
            pre_hash: pre.content_hash(),
            post_hash: post.content_hash(),
            elements_added,
            elements_removed,
            elements_modified,
            scalar_changes,
            semantic_events: Vec::new(),
            computed_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        let mut events = Vec::new();
        for classifier in &self.classifiers {
            events.extend(classifier(&diff));
        }
        diff.semantic_events = events;
        diff
    }
}

impl Default for StateDiffEngine {
    fn default() -> Self {
        Self::with_default_classifiers()
    }
}

/// Field-level changes between two descriptors sharing an index.
fn element_changes(old: &ElementDescriptor, new: &ElementDescriptor) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if old.text_excerpt != new.text_excerpt {
        changes.push(FieldChange {
            field: "text_excerpt".into(),
            old: old.text_excerpt.clone().into(),
            new: new.text_excerpt.clone().into(),
        });
    }
    if old.kind != new.kind {
        changes.push(FieldChange {
            field: "kind".into(),
            old: old.kind.clone().into(),
            new: new.kind.clone().into(),
        });
    }

    for (name, new_value) in &new.attributes {
        match old.attributes.get(name) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => changes.push(FieldChange {
                field: format!("attributes.{name}"),
                old: old_value.clone().into(),
                new: new_value.clone().into(),
            }),
            None => changes.push(FieldChange {
                field: format!("attributes.{name}"),
                old: serde_json::Value::Null,
                new: new_value.clone().into(),
            }),
        }
    }
    for (name, old_value) in &old.attributes {
        if !new.attributes.contains_key(name) {
            changes.push(FieldChange {
                field: format!("attributes.{name}"),
                old: old_value.clone().into(),
                new: serde_json::Value::Null,
            });
        }
    }

    changes
}

// ── Built-in classifiers ─────────────────────────────────────────────────

const OVERLAY_TOKENS: &[&str] = &["modal", "overlay", "dialog", "popup", "drawer"];
const FORM_TOKENS: &[&str] = &["form", "checkout", "login", "signup"];

fn matches_any(haystacks: &[&str], tokens: &[&str]) -> bool {
    haystacks.iter().any(|hay| {
        let hay = hay.to_ascii_lowercase();
        tokens.iter().any(|token| hay.contains(token))
    })
}

/// `scalar_fields.url` / `.location` changed → the session navigated.
fn classify_navigation(diff: &StateDiff) -> Vec<SemanticEvent> {
    diff.scalar_changes
        .iter()
        .filter(|(field, _)| field.as_str() == "url" || field.as_str() == "location")
        .map(|(field, change)| SemanticEvent {
            event_type: SemanticEventType::Navigation,
            confidence: 0.95,
            selector: None,
            detail: format!("{field} changed: {} -> {}", change.old, change.new),
        })
        .collect()
}

/// A new element resembling a modal/overlay appeared.
fn classify_overlay_appeared(diff: &StateDiff) -> Vec<SemanticEvent> {
    diff.elements_added
        .values()
        .filter(|descriptor| {
            matches_any(
                &[
                    descriptor.kind.as_str(),
                    descriptor.selector.as_str(),
                    descriptor.class_attr().unwrap_or(""),
                ],
                OVERLAY_TOKENS,
            )
        })
        .map(|descriptor| SemanticEvent {
            event_type: SemanticEventType::UiState,
            confidence: 0.7,
            selector: Some(descriptor.selector.clone()),
            detail: format!("overlay-like element appeared ({})", descriptor.kind),
        })
        .collect()
}

/// A previously-present form-like container disappeared.
fn classify_form_vanished(diff: &StateDiff) -> Vec<SemanticEvent> {
    diff.elements_removed
        .values()
        .filter(|removed| matches_any(&[removed.kind.as_str(), removed.selector.as_str()], FORM_TOKENS))
        .map(|removed| SemanticEvent {
            event_type: SemanticEventType::Form,
            confidence: 0.6,
            selector: Some(removed.selector.clone()),
            detail: format!("form-like element disappeared ({})", removed.kind),
        })
        .collect()
}

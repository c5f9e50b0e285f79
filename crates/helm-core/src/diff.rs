//! Structured diff between two state snapshots.
//!
//! These are pure data types; the diff computation itself lives in the
//! engine crate. A diff is derived once and never mutated, content-addressed
//! by the pre/post snapshot hashes it was computed from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::ElementDescriptor;

/// One field-level change on an element that exists in both snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// `"text_excerpt"`, `"kind"`, or `"attributes.<name>"`.
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Minimal record of an element that disappeared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedElement {
    pub selector: String,
    pub kind: String,
}

/// Changes to an element present in both snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModifiedElement {
    pub selector: String,
    pub changes: Vec<FieldChange>,
}

/// Old/new pair for a changed scalar field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarChange {
    pub old: Value,
    pub new: Value,
}

/// Category of a derived semantic event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticEventType {
    Navigation,
    UiState,
    Form,
}

/// A higher-level interpretation of the raw diff, produced by a registered
/// classifier (e.g. "a modal appeared").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvent {
    pub event_type: SemanticEventType,
    /// Classifier confidence in [0, 1].
    pub confidence: f32,
    /// Selector of the element that triggered the event, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub detail: String,
}

/// Structured difference between two snapshots of the same session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub pre_hash: String,
    pub post_hash: String,
    /// Keys present only in the post snapshot, with full descriptors.
    pub elements_added: BTreeMap<u32, ElementDescriptor>,
    /// Keys present only in the pre snapshot, with minimal descriptors.
    pub elements_removed: BTreeMap<u32, RemovedElement>,
    /// Keys present in both where observable fields differ.
    pub elements_modified: BTreeMap<u32, ModifiedElement>,
    pub scalar_changes: BTreeMap<String, ScalarChange>,
    pub semantic_events: Vec<SemanticEvent>,
    pub computed_at_ms: i64,
}

impl StateDiff {
    /// True when the two snapshots were observably identical.
    pub fn is_empty(&self) -> bool {
        self.elements_added.is_empty()
            && self.elements_removed.is_empty()
            && self.elements_modified.is_empty()
            && self.scalar_changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_is_empty() {
        let diff = StateDiff {
            pre_hash: "a".into(),
            post_hash: "a".into(),
            elements_added: BTreeMap::new(),
            elements_removed: BTreeMap::new(),
            elements_modified: BTreeMap::new(),
            scalar_changes: BTreeMap::new(),
            semantic_events: Vec::new(),
            computed_at_ms: 0,
        };
        assert!(diff.is_empty());
    }

    #[test]
    fn scalar_change_makes_diff_nonempty() {
        let mut scalar_changes = BTreeMap::new();
        scalar_changes.insert(
            "url".to_string(),
            ScalarChange {
                old: serde_json::json!("/home"),
                new: serde_json::json!("/next"),
            },
        );
        let diff = StateDiff {
            pre_hash: "a".into(),
            post_hash: "b".into(),
            elements_added: BTreeMap::new(),
            elements_removed: BTreeMap::new(),
            elements_modified: BTreeMap::new(),
            scalar_changes,
            semantic_events: Vec::new(),
            computed_at_ms: 0,
        };
        assert!(!diff.is_empty());
    }

    #[test]
    fn semantic_event_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SemanticEventType::UiState).unwrap(),
            "\"ui_state\""
        );
        assert_eq!(
            serde_json::to_string(&SemanticEventType::Navigation).unwrap(),
            "\"navigation\""
        );
    }

    #[test]
    fn semantic_event_omits_null_selector() {
        let event = SemanticEvent {
            event_type: SemanticEventType::Navigation,
            confidence: 0.95,
            selector: None,
            detail: "location changed".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("selector"));
    }
}

//! Point-in-time captures of a session's observable state.
//!
//! Snapshots are immutable once captured. Element indices are
//! snapshotter-assigned and stable across consecutive captures for
//! unchanged elements, which is what makes two snapshots of the same
//! session index-comparable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// On-page position of an element, in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One observable element of the session's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub selector: String,
    /// Coarse element kind: "button", "input", "link", "form", "dialog", ...
    pub kind: String,
    pub text_excerpt: String,
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

impl ElementDescriptor {
    /// The element's `class` attribute, when present. Semantic-event
    /// classifiers lean on class tokens to recognize overlays and forms.
    pub fn class_attr(&self) -> Option<&str> {
        self.attributes.get("class").map(String::as_str)
    }
}

/// An immutable capture of session state.
///
/// `elements` and `scalar_fields` are BTreeMaps so serialization is stable
/// and sorted, which the content hash depends on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub resource_id: String,
    pub label: String,
    pub elements: BTreeMap<u32, ElementDescriptor>,
    pub scalar_fields: BTreeMap<String, Value>,
    pub captured_at: DateTime<Utc>,
}

/// Content projection used for hashing. Excludes `captured_at` so two
/// captures of identical state hash identically.
#[derive(Serialize)]
struct HashableContent<'a> {
    resource_id: &'a str,
    label: &'a str,
    elements: &'a BTreeMap<u32, ElementDescriptor>,
    scalar_fields: &'a BTreeMap<String, Value>,
}

impl StateSnapshot {
    /// SHA-256 over the stable sorted serialization of the snapshot content.
    pub fn content_hash(&self) -> String {
        let content = HashableContent {
            resource_id: &self.resource_id,
            label: &self.label,
            elements: &self.elements,
            scalar_fields: &self.scalar_fields,
        };
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{digest:x}")
    }

    /// Compact summary for inclusion in state-update envelopes.
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            resource_id: self.resource_id.clone(),
            label: self.label.clone(),
            element_count: self.elements.len(),
            scalar_fields: self.scalar_fields.clone(),
        }
    }
}

/// Compact view of the current state, shipped with every update envelope
/// so consumers can render without replaying diffs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub resource_id: String,
    pub label: String,
    pub element_count: usize,
    pub scalar_fields: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(selector: &str, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            selector: selector.into(),
            kind: "button".into(),
            text_excerpt: text.into(),
            attributes: BTreeMap::new(),
            bounds: None,
        }
    }

    fn snapshot(url: &str) -> StateSnapshot {
        let mut elements = BTreeMap::new();
        elements.insert(0, element("#btn", "Go"));
        let mut scalar_fields = BTreeMap::new();
        scalar_fields.insert("url".to_string(), json!(url));
        StateSnapshot {
            resource_id: "page-1".into(),
            label: "Home".into(),
            elements,
            scalar_fields,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn identical_content_hashes_identically() {
        let a = snapshot("/home");
        let mut b = a.clone();
        // Capture times differ; content does not.
        b.captured_at = b.captured_at + chrono::Duration::seconds(5);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_change_changes_hash() {
        let a = snapshot("/home");
        let b = snapshot("/next");
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = snapshot("/home").content_hash();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn element_order_does_not_affect_hash() {
        let mut a = snapshot("/home");
        a.elements.insert(5, element("#later", "B"));
        a.elements.insert(2, element("#mid", "A"));

        let mut b = snapshot("/home");
        b.elements.insert(2, element("#mid", "A"));
        b.elements.insert(5, element("#later", "B"));

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn summary_reflects_snapshot() {
        let snap = snapshot("/home");
        let summary = snap.summary();
        assert_eq!(summary.resource_id, "page-1");
        assert_eq!(summary.element_count, 1);
        assert_eq!(summary.scalar_fields["url"], "/home");
    }

    #[test]
    fn class_attr_lookup() {
        let mut el = element("#x", "");
        assert!(el.class_attr().is_none());
        el.attributes.insert("class".into(), "modal fade".into());
        assert_eq!(el.class_attr(), Some("modal fade"));
    }

    #[test]
    fn bounds_omitted_when_none() {
        let el = element("#x", "");
        let json = serde_json::to_value(&el).unwrap();
        assert!(json.get("bounds").is_none());
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let snap = snapshot("/home");
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content_hash(), snap.content_hash());
    }
}

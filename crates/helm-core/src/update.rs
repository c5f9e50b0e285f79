//! Outbound state-update envelope.
//!
//! Exactly one envelope is published per successfully processed command.
//! A confirmed duplicate republishes the stored result of the original
//! execution (no diff, no summary) when the dedup cache still holds it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diff::StateDiff;
use crate::ids::{CommandId, SessionId, UpdateId};
use crate::snapshot::StateSummary;

/// Outcome reported by the action executor.
///
/// Executors never panic and never error out-of-band; every failure is a
/// `success = false` result with an explanation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: Map::new(),
        }
    }

    pub fn ok_with_data(data: Map<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: Map::new(),
        }
    }
}

/// The envelope published to `state:{session_id}` after a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdateEnvelope {
    pub update_id: UpdateId,
    pub session_id: SessionId,
    pub command_id: CommandId,
    pub sequence_number: u64,
    pub action_result: ActionResult,
    /// Absent on duplicate republish (the diff was shipped with the
    /// original update).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<StateDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state_summary: Option<StateSummary>,
    pub published_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_result() {
        let result = ActionResult::ok();
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.data.is_empty());
    }

    #[test]
    fn failed_result_carries_error() {
        let result = ActionResult::failed("element not found: #missing");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("element not found: #missing"));
    }

    #[test]
    fn result_omits_empty_fields() {
        let json = serde_json::to_string(&ActionResult::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }

    #[test]
    fn result_serde_roundtrip_with_data() {
        let mut data = Map::new();
        data.insert("screenshot_id".to_string(), json!("shot_9"));
        let result = ActionResult::ok_with_data(data);
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ActionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn envelope_wire_shape() {
        let envelope = StateUpdateEnvelope {
            update_id: UpdateId::from_raw("upd_1"),
            session_id: SessionId::from_raw("sess_1"),
            command_id: CommandId::from_raw("cmd_1"),
            sequence_number: 4,
            action_result: ActionResult::ok(),
            state_diff: None,
            current_state_summary: None,
            published_at_ms: 1_754_000_000_000,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["update_id"], "upd_1");
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["command_id"], "cmd_1");
        assert_eq!(json["sequence_number"], 4);
        assert_eq!(json["action_result"]["success"], true);
        // Duplicate republish: no diff, no summary on the wire.
        assert!(json.get("state_diff").is_none());
        assert!(json.get("current_state_summary").is_none());
    }
}

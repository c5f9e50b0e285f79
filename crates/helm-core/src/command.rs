//! Command envelope and action model.
//!
//! Commands arrive as flat key/value stream fields. The `action` field is a
//! JSON object `{"action_type": "...", "params": {...}}`; known action kinds
//! parse into typed variants, unknown kinds fall through to [`ActionRequest::Custom`]
//! so executor-specific actions keep working without a core change.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::errors::ParseError;
use crate::ids::{CommandId, SessionId};

/// A single remote-control action requested against a session.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionRequest {
    Navigate { url: String },
    Click { selector: String },
    TypeText { selector: String, text: String },
    Scroll { delta_x: f64, delta_y: f64 },
    Back,
    Screenshot,
    /// Forward-compatible fallback for action kinds this crate does not know.
    Custom {
        action_type: String,
        params: Map<String, Value>,
    },
}

impl ActionRequest {
    /// Wire name of the action kind.
    pub fn action_type(&self) -> &str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::Scroll { .. } => "scroll",
            Self::Back => "back",
            Self::Screenshot => "screenshot",
            Self::Custom { action_type, .. } => action_type,
        }
    }

    /// Decode from the wire object `{"action_type": ..., "params": {...}}`.
    ///
    /// A *known* kind with malformed params is an error rather than a silent
    /// `Custom` fallback, so a typo'd payload fails loudly.
    pub fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let action_type = value
            .get("action_type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("action_type"))?;
        let params = value.get("params").cloned().unwrap_or_else(|| json!({}));

        let str_param = |key: &'static str| -> Result<String, ParseError> {
            params
                .get(key)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| {
                    ParseError::InvalidAction(format!("{action_type}: missing or non-string param `{key}`"))
                })
        };

        match action_type {
            "navigate" => Ok(Self::Navigate { url: str_param("url")? }),
            "click" => Ok(Self::Click {
                selector: str_param("selector")?,
            }),
            "type_text" => Ok(Self::TypeText {
                selector: str_param("selector")?,
                text: str_param("text")?,
            }),
            "scroll" => Ok(Self::Scroll {
                delta_x: params.get("delta_x").and_then(Value::as_f64).unwrap_or(0.0),
                delta_y: params.get("delta_y").and_then(Value::as_f64).unwrap_or(0.0),
            }),
            "back" => Ok(Self::Back),
            "screenshot" => Ok(Self::Screenshot),
            other => {
                let params = match params {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    _ => {
                        return Err(ParseError::InvalidAction(format!(
                            "{other}: params must be an object"
                        )))
                    }
                };
                Ok(Self::Custom {
                    action_type: other.to_string(),
                    params,
                })
            }
        }
    }

    /// Encode to the wire object `{"action_type": ..., "params": {...}}`.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Navigate { url } => json!({"action_type": "navigate", "params": {"url": url}}),
            Self::Click { selector } => {
                json!({"action_type": "click", "params": {"selector": selector}})
            }
            Self::TypeText { selector, text } => {
                json!({"action_type": "type_text", "params": {"selector": selector, "text": text}})
            }
            Self::Scroll { delta_x, delta_y } => {
                json!({"action_type": "scroll", "params": {"delta_x": delta_x, "delta_y": delta_y}})
            }
            Self::Back => json!({"action_type": "back", "params": {}}),
            Self::Screenshot => json!({"action_type": "screenshot", "params": {}}),
            Self::Custom { action_type, params } => {
                json!({"action_type": action_type, "params": params})
            }
        }
    }
}

impl Serialize for ActionRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value).map_err(D::Error::custom)
    }
}

/// A command as read off the inbound log, after wire-field decoding.
///
/// Unique per `(session_id, command_id)`; `sequence_number` is assigned by
/// the producer and must be contiguous per session starting at 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: CommandId,
    pub session_id: SessionId,
    pub sequence_number: u64,
    pub action: ActionRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<Value>,
    pub enqueued_at_ms: i64,
}

impl CommandEnvelope {
    /// Decode from flat stream fields.
    ///
    /// `room_name` is accepted as an alias for `session_id` (older producers
    /// key commands by room).
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, ParseError> {
        let get = |key: &str| fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        let command_id = get("command_id").ok_or(ParseError::MissingField("command_id"))?;
        let session_id = get("session_id")
            .or_else(|| get("room_name"))
            .ok_or(ParseError::MissingField("session_id"))?;

        let sequence_number = get("sequence_number")
            .ok_or(ParseError::MissingField("sequence_number"))?
            .parse::<u64>()
            .map_err(|e| ParseError::InvalidField {
                field: "sequence_number",
                reason: e.to_string(),
            })?;

        let action_raw = get("action").ok_or(ParseError::MissingField("action"))?;
        let action_value: Value =
            serde_json::from_str(action_raw).map_err(|e| ParseError::InvalidField {
                field: "action",
                reason: e.to_string(),
            })?;
        let action = ActionRequest::from_wire(&action_value)?;

        let trace_context = match get("trace_context") {
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| ParseError::InvalidField {
                field: "trace_context",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let enqueued_at_ms = match get("timestamp_ms") {
            Some(raw) => raw.parse::<i64>().map_err(|e| ParseError::InvalidField {
                field: "timestamp_ms",
                reason: e.to_string(),
            })?,
            None => 0,
        };

        Ok(Self {
            command_id: CommandId::from_raw(command_id),
            session_id: SessionId::from_raw(session_id),
            sequence_number,
            action,
            trace_context,
            enqueued_at_ms,
        })
    }

    /// Encode to flat stream fields (the producer side of [`Self::from_fields`]).
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("command_id".to_string(), self.command_id.to_string()),
            ("session_id".to_string(), self.session_id.to_string()),
            ("sequence_number".to_string(), self.sequence_number.to_string()),
            ("action".to_string(), self.action.to_wire().to_string()),
            ("timestamp_ms".to_string(), self.enqueued_at_ms.to_string()),
        ];
        if let Some(trace) = &self.trace_context {
            fields.push(("trace_context".to_string(), trace.to_string()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parse_navigate_action() {
        let action =
            ActionRequest::from_wire(&json!({"action_type": "navigate", "params": {"url": "https://example.com"}}))
                .unwrap();
        assert_eq!(
            action,
            ActionRequest::Navigate {
                url: "https://example.com".into()
            }
        );
        assert_eq!(action.action_type(), "navigate");
    }

    #[test]
    fn parse_type_text_action() {
        let action = ActionRequest::from_wire(
            &json!({"action_type": "type_text", "params": {"selector": "#q", "text": "rust"}}),
        )
        .unwrap();
        assert_eq!(
            action,
            ActionRequest::TypeText {
                selector: "#q".into(),
                text: "rust".into()
            }
        );
    }

    #[test]
    fn parse_scroll_defaults_missing_deltas() {
        let action =
            ActionRequest::from_wire(&json!({"action_type": "scroll", "params": {"delta_y": 240.0}})).unwrap();
        assert_eq!(action, ActionRequest::Scroll { delta_x: 0.0, delta_y: 240.0 });
    }

    #[test]
    fn parse_unit_actions_without_params() {
        assert_eq!(
            ActionRequest::from_wire(&json!({"action_type": "back"})).unwrap(),
            ActionRequest::Back
        );
        assert_eq!(
            ActionRequest::from_wire(&json!({"action_type": "screenshot", "params": {}})).unwrap(),
            ActionRequest::Screenshot
        );
    }

    #[test]
    fn unknown_kind_falls_back_to_custom() {
        let action = ActionRequest::from_wire(
            &json!({"action_type": "drag_and_drop", "params": {"from": "#a", "to": "#b"}}),
        )
        .unwrap();
        match &action {
            ActionRequest::Custom { action_type, params } => {
                assert_eq!(action_type, "drag_and_drop");
                assert_eq!(params["from"], "#a");
            }
            other => panic!("expected Custom, got {other:?}"),
        }
        assert_eq!(action.action_type(), "drag_and_drop");
    }

    #[test]
    fn known_kind_with_bad_params_is_an_error() {
        // `navigate` without a url must not silently become Custom.
        let err = ActionRequest::from_wire(&json!({"action_type": "navigate", "params": {}})).unwrap_err();
        assert!(matches!(err, ParseError::InvalidAction(_)), "got: {err}");
    }

    #[test]
    fn action_wire_roundtrip() {
        let actions = vec![
            ActionRequest::Navigate { url: "/next".into() },
            ActionRequest::Click { selector: "#submit".into() },
            ActionRequest::TypeText { selector: "#q".into(), text: "hi".into() },
            ActionRequest::Scroll { delta_x: 0.0, delta_y: -120.0 },
            ActionRequest::Back,
            ActionRequest::Screenshot,
        ];
        for action in actions {
            let wire = action.to_wire();
            let parsed = ActionRequest::from_wire(&wire).unwrap();
            assert_eq!(action, parsed, "roundtrip failed for {wire}");
        }
    }

    #[test]
    fn action_serde_uses_wire_shape() {
        let action = ActionRequest::Click { selector: "#ok".into() };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action_type"], "click");
        assert_eq!(json["params"]["selector"], "#ok");
        let parsed: ActionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn envelope_from_fields() {
        let envelope = CommandEnvelope::from_fields(&fields(&[
            ("command_id", "cmd_1"),
            ("session_id", "sess_1"),
            ("sequence_number", "7"),
            ("action", r#"{"action_type":"back","params":{}}"#),
            ("timestamp_ms", "1754000000000"),
        ]))
        .unwrap();

        assert_eq!(envelope.command_id.as_str(), "cmd_1");
        assert_eq!(envelope.session_id.as_str(), "sess_1");
        assert_eq!(envelope.sequence_number, 7);
        assert_eq!(envelope.action, ActionRequest::Back);
        assert_eq!(envelope.enqueued_at_ms, 1_754_000_000_000);
        assert!(envelope.trace_context.is_none());
    }

    #[test]
    fn envelope_accepts_room_name_alias() {
        let envelope = CommandEnvelope::from_fields(&fields(&[
            ("command_id", "cmd_1"),
            ("room_name", "sess_room"),
            ("sequence_number", "1"),
            ("action", r#"{"action_type":"screenshot"}"#),
        ]))
        .unwrap();
        assert_eq!(envelope.session_id.as_str(), "sess_room");
        assert_eq!(envelope.enqueued_at_ms, 0);
    }

    #[test]
    fn envelope_missing_sequence_is_error() {
        let err = CommandEnvelope::from_fields(&fields(&[
            ("command_id", "cmd_1"),
            ("session_id", "sess_1"),
            ("action", r#"{"action_type":"back"}"#),
        ]))
        .unwrap_err();
        assert!(matches!(err, ParseError::MissingField("sequence_number")));
    }

    #[test]
    fn envelope_bad_action_json_is_error() {
        let err = CommandEnvelope::from_fields(&fields(&[
            ("command_id", "cmd_1"),
            ("session_id", "sess_1"),
            ("sequence_number", "1"),
            ("action", "{not json"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "action", .. }));
    }

    #[test]
    fn envelope_fields_roundtrip() {
        let envelope = CommandEnvelope {
            command_id: CommandId::from_raw("cmd_42"),
            session_id: SessionId::from_raw("sess_9"),
            sequence_number: 3,
            action: ActionRequest::Navigate { url: "/checkout".into() },
            trace_context: Some(json!({"trace_id": "abc123"})),
            enqueued_at_ms: 1_754_000_123_456,
        };
        let parsed = CommandEnvelope::from_fields(&envelope.to_fields()).unwrap();
        assert_eq!(parsed, envelope);
    }
}

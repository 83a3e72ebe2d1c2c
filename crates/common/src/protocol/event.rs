// Tagged events streamed back for a run request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Bail code meaning the runtime accepted the hand-off.
pub const PREFLIGHT_CODE: &str = "PREFLIGHT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown event tag `{0}`")]
    UnknownTag(String),

    #[error("malformed final payload: {0}")]
    MalformedFinal(String),
}

/// One event of a run stream: `{ "tag": ..., "data": ... }` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub enum StreamEvent {
    /// Intermediate progress; the payload is opaque to the launcher.
    Status(Value),
    /// Terminal event; nothing follows it for the same request.
    Final(FinalPayload),
}

impl StreamEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Final(_) => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

/// Data of the terminal event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bail: Option<Bail>,
}

/// Outcome reported by the runtime for a run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bail {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl Bail {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into(), message: None, stack: None, info: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_preflight(&self) -> bool {
        self.code == PREFLIGHT_CODE
    }

    /// Most detailed text available: stack, then message, then the code itself.
    pub fn diagnostic(&self) -> &str {
        self.stack.as_deref().or(self.message.as_deref()).unwrap_or(&self.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    tag: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawEvent> for StreamEvent {
    type Error = ProtocolError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        match raw.tag.as_str() {
            "status" => Ok(Self::Status(raw.data)),
            "final" if raw.data.is_null() => Ok(Self::Final(FinalPayload::default())),
            "final" => serde_json::from_value(raw.data)
                .map(Self::Final)
                .map_err(|error| ProtocolError::MalformedFinal(error.to_string())),
            _ => Err(ProtocolError::UnknownTag(raw.tag)),
        }
    }
}

impl From<StreamEvent> for RawEvent {
    fn from(event: StreamEvent) -> Self {
        let tag = event.tag().to_string();
        let data = match event {
            StreamEvent::Status(data) => data,
            StreamEvent::Final(payload) => serde_json::to_value(payload).unwrap_or(Value::Null),
        };
        Self { tag, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_keeps_payload_verbatim() {
        let event: StreamEvent =
            serde_json::from_value(json!({ "tag": "status", "data": { "some": "status" } }))
                .expect("status event");
        assert_eq!(event, StreamEvent::Status(json!({ "some": "status" })));
    }

    #[test]
    fn final_with_preflight_bail() {
        let event: StreamEvent =
            serde_json::from_value(json!({ "tag": "final", "data": { "bail": { "code": "PREFLIGHT" } } }))
                .expect("final event");
        let StreamEvent::Final(payload) = event else { panic!("expected final event") };
        assert!(payload.bail.expect("bail").is_preflight());
    }

    #[test]
    fn final_without_data_has_no_bail() {
        let event: StreamEvent =
            serde_json::from_value(json!({ "tag": "final" })).expect("bare final event");
        assert_eq!(event, StreamEvent::Final(FinalPayload::default()));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let error = serde_json::from_value::<StreamEvent>(json!({ "tag": "progress", "data": 1 }))
            .expect_err("unknown tag");
        assert!(error.to_string().contains("unknown event tag `progress`"));
    }

    #[test]
    fn serializes_back_to_tagged_shape() {
        let event = StreamEvent::Final(FinalPayload {
            bail: Some(Bail::new("ERR_CONNECTION").with_message("fail")),
        });
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({ "tag": "final", "data": { "bail": { "code": "ERR_CONNECTION", "message": "fail" } } })
        );
    }

    #[test]
    fn diagnostic_prefers_stack_then_message_then_code() {
        let mut bail = Bail::new("ERR_X");
        assert_eq!(bail.diagnostic(), "ERR_X");
        bail.message = Some("boom".into());
        assert_eq!(bail.diagnostic(), "boom");
        bail.stack = Some("Error: boom\n    at run".into());
        assert_eq!(bail.diagnostic(), "Error: boom\n    at run");
    }
}

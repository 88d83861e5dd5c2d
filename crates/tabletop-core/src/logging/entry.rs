//! One JSONL line per tracing event

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single log line.
///
/// Lines are self-contained so several peers can write side by side and the
/// files can be merged by timestamp afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339, millisecond precision, UTC
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Peer that wrote the line
    pub peer: String,

    pub target: String,

    pub msg: String,

    /// Room the event concerns, lifted out of a `room_id` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, outermost first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: impl Into<String>,
        peer: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            peer: peer.into(),
            target: target.into(),
            msg: msg.into(),
            room: None,
            fields: None,
            span: None,
        }
    }

    /// Attach structured fields, promoting `room_id` to [`LogEntry::room`]
    pub fn with_fields(mut self, mut fields: serde_json::Map<String, Value>) -> Self {
        if let Some(Value::String(room)) = fields.remove("room_id") {
            self.room = Some(room);
        }
        if !fields.is_empty() {
            self.fields = Some(Value::Object(fields));
        }
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_id_is_promoted() {
        let mut fields = serde_json::Map::new();
        fields.insert("room_id".into(), json!("r1"));
        fields.insert("intent_id".into(), json!("01J"));
        let entry = LogEntry::new("info", "alice", "tabletop_core::gateway", "Mutation committed")
            .with_fields(fields);

        assert_eq!(entry.room.as_deref(), Some("r1"));
        assert_eq!(entry.fields, Some(json!({"intent_id": "01J"})));

        let line = entry.to_json_line().unwrap();
        assert!(line.contains("\"room\":\"r1\""));
        assert_eq!(LogEntry::from_json_line(&line).unwrap(), entry);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let entry = LogEntry::new("debug", "bob", "t", "m").with_fields(serde_json::Map::new());
        let line = entry.to_json_line().unwrap();
        assert!(!line.contains("fields"));
        assert!(!line.contains("room"));
    }
}

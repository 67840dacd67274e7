//! Change event types and Debezium envelope decoding

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row-level operation carried in a change event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Initial snapshot row emitted while the connector bootstraps a table
    SnapshotRead,
}

impl Operation {
    /// Parse the connector's single-letter `op` code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            "r" => Some(Operation::SnapshotRead),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::SnapshotRead => "r",
        }
    }

    /// Whether the operation counts as table activity. Deletes never do.
    pub fn is_qualifying(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Message as handed over by a change source, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// `None` for tombstones
    pub payload: Option<Vec<u8>>,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, received_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            payload: Some(payload.into()),
            received_at,
        }
    }

    pub fn tombstone(topic: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            payload: None,
            received_at,
        }
    }

    pub fn with_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }
}

/// Decoded change event for a tracked table
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub topic: String,
    pub table: String,
    pub operation: Operation,
    /// The envelope's `payload` object, kept opaque
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        topic: impl Into<String>,
        table: impl Into<String>,
        operation: Operation,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            table: table.into(),
            operation,
            payload: serde_json::Value::Null,
            received_at,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Decode a JSON envelope into its operation and payload.
///
/// Bytes that are not JSON are an error. An envelope without a `payload`
/// object, or whose `op` is absent or unrecognised, decodes to `Ok(None)`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Option<(Operation, serde_json::Value)>> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;

    let Some(payload) = envelope.payload.filter(|p| p.is_object()) else {
        return Ok(None);
    };

    let operation = payload
        .get("op")
        .and_then(|op| op.as_str())
        .and_then(Operation::from_code);

    Ok(operation.map(|op| (op, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LullError;
    use serde_json::json;

    #[test]
    fn test_operation_codes() {
        for op in [
            Operation::Create,
            Operation::Update,
            Operation::Delete,
            Operation::SnapshotRead,
        ] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code("t"), None);
        assert_eq!(Operation::from_code(""), None);
    }

    #[test]
    fn test_qualifying_operations() {
        assert!(Operation::Create.is_qualifying());
        assert!(Operation::Update.is_qualifying());
        assert!(Operation::SnapshotRead.is_qualifying());
        assert!(!Operation::Delete.is_qualifying());
    }

    #[test]
    fn test_decode_debezium_envelope() {
        let message = json!({
            "schema": {"type": "struct"},
            "payload": {
                "before": null,
                "after": {"id": 7, "name": "Ada"},
                "source": {"table": "students"},
                "op": "c",
                "ts_ms": 1700000000000u64
            }
        });
        let bytes = serde_json::to_vec(&message).unwrap();

        let (op, payload) = decode_envelope(&bytes).unwrap().unwrap();
        assert_eq!(op, Operation::Create);
        assert_eq!(payload["after"]["name"], "Ada");
    }

    #[test]
    fn test_decode_ignores_missing_or_unknown_op() {
        assert!(decode_envelope(br#"{"payload": {"after": {}}}"#).unwrap().is_none());
        assert!(decode_envelope(br#"{"payload": {"op": "t"}}"#).unwrap().is_none());
        assert!(decode_envelope(br#"{"payload": {"op": 3}}"#).unwrap().is_none());
        assert!(decode_envelope(br#"{"payload": null}"#).unwrap().is_none());
        assert!(decode_envelope(br#"{"schema": {}}"#).unwrap().is_none());
        // an unwrapped payload is not an envelope
        assert!(decode_envelope(br#"{"op": "c"}"#).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let err = decode_envelope(b"{not json").unwrap_err();
        assert!(matches!(err, LullError::Decode(_)));

        let err = decode_envelope(br#""just a string""#).unwrap_err();
        assert!(matches!(err, LullError::Decode(_)));
    }

    #[test]
    fn test_raw_message_builders() {
        let now = Utc::now();
        let msg = RawMessage::new("topic-a", b"{}".to_vec(), now).with_position(2, 41);
        assert_eq!(msg.partition, 2);
        assert_eq!(msg.offset, 41);
        assert!(msg.payload.is_some());

        let tombstone = RawMessage::tombstone("topic-a", now);
        assert!(tombstone.payload.is_none());
    }
}

//! Wire envelope for sync messages
//!
//! All peer traffic is one JSON envelope shape:
//!
//! ```json
//! {"type":"stateChange","path":"Controls.Flaps","value":5.0,
//!  "serverTime":1700000000000,"originId":"a1b2","sequence":17}
//! ```
//!
//! Full snapshots and multi-key diffs carry a `payload` map instead of
//! `path`/`value`. `serverTime` is the sender's send stamp, monotonic per
//! sender. `originId` identifies the sending instance and is the
//! authoritative anti-echo key; the `serverTime` match is kept as a
//! secondary heuristic for buses that loop sends back without metadata.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use skysync_core::{Value, ValueMap};

/// Message kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Full state snapshot
    #[serde(rename = "snapshot")]
    Snapshot,
    /// Incremental change (single path or diff payload)
    #[serde(rename = "stateChange")]
    StateChange,
}

/// One sync message as it travels over the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Flat path -> value map (full snapshot or multi-key diff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ValueMap>,
    /// Single changed path (compact form)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Value for the single changed path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Sender's send stamp in unix milliseconds, monotonic per sender
    pub server_time: i64,
    /// Sending instance identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Monotonic per-origin message counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl WireEnvelope {
    /// Build a full-snapshot envelope
    pub fn snapshot(payload: ValueMap, server_time: i64) -> Self {
        Self {
            kind: MessageKind::Snapshot,
            payload: Some(payload),
            path: None,
            value: None,
            server_time,
            origin_id: None,
            sequence: None,
        }
    }

    /// Build a multi-key incremental envelope
    pub fn state_diff(payload: ValueMap, server_time: i64) -> Self {
        Self {
            kind: MessageKind::StateChange,
            payload: Some(payload),
            path: None,
            value: None,
            server_time,
            origin_id: None,
            sequence: None,
        }
    }

    /// Build a compact single path/value envelope
    pub fn state_change(path: impl Into<String>, value: Value, server_time: i64) -> Self {
        Self {
            kind: MessageKind::StateChange,
            payload: None,
            path: Some(path.into()),
            value: Some(value),
            server_time,
            origin_id: None,
            sequence: None,
        }
    }

    /// Tag the envelope with its originating instance
    pub fn with_origin(mut self, origin_id: impl Into<String>, sequence: u64) -> Self {
        self.origin_id = Some(origin_id.into());
        self.sequence = Some(sequence);
        self
    }

    /// Encode to wire bytes (JSON)
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_wire_shape() {
        let env = WireEnvelope::state_change("Controls.Flaps", Value::Float(5.0), 1000)
            .with_origin("peer-a", 3);
        let json = String::from_utf8(env.encode().unwrap()).unwrap();

        assert!(json.contains(r#""type":"stateChange""#));
        assert!(json.contains(r#""path":"Controls.Flaps""#));
        assert!(json.contains(r#""serverTime":1000"#));
        assert!(json.contains(r#""originId":"peer-a""#));
        // Unused compact fields must not clutter the wire.
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut payload = ValueMap::new();
        payload.insert("Controls.Flaps".into(), Value::Float(0.0));
        payload.insert("Systems.LightsOn".into(), Value::Bool(true));

        let env = WireEnvelope::snapshot(payload, 1700000000000);
        let back = WireEnvelope::decode(&env.encode().unwrap()).unwrap();

        assert_eq!(back.kind, MessageKind::Snapshot);
        assert_eq!(back.server_time, 1700000000000);
        let payload = back.payload.unwrap();
        assert_eq!(payload.get("Systems.LightsOn"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_decode_external_producer() {
        // Shape a browser dashboard or another peer implementation emits.
        let json = br#"{"type":"snapshot","payload":{"Controls.Flaps":0},"serverTime":1000}"#;
        let env = WireEnvelope::decode(json).unwrap();

        assert_eq!(env.kind, MessageKind::Snapshot);
        assert_eq!(
            env.payload.unwrap().get("Controls.Flaps"),
            Some(&Value::Int(0))
        );
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(WireEnvelope::decode(b"{\"type\":").is_err());
        assert!(WireEnvelope::decode(b"not json").is_err());
    }
}

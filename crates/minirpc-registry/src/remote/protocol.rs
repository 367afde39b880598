//! Coordination messages carried in minirpc frames.
//!
//! A client frame holds one [`CoordRequest`]; the server answers with a
//! [`CoordMessage::Reply`] under the same `msg_id`. Watch notifications are
//! pushed as [`CoordMessage::Event`] frames with `msg_id` [`EVENT_MSG_ID`],
//! which the id generator never hands out.

use minirpc_common::protocol::error::{MinirpcError, Result};
use minirpc_common::protocol::MsgId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::coordinator::{CreateMode, WatchEvent};

/// `msg_id` of unsolicited frames
pub const EVENT_MSG_ID: MsgId = 0;

/// Identifies one armed watch within a connection
pub type WatchId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CoordRequest {
    Create { path: String, mode: CreateMode },
    Delete { path: String },
    Exists { path: String },
    GetChildren { path: String },
    /// List children and arm a watch that reports back under `watch_id`.
    WatchChildren { path: String, watch_id: WatchId },
    /// End the session; the server replies, then hangs up.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordMessage {
    Reply { outcome: Outcome },
    Event { watch_id: WatchId, event: WatchEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Exists(bool),
    Children(Vec<String>),
    Failed(WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoNode,
    NodeExists,
    NotEmpty,
    SessionClosed,
    Invalid,
}

/// Coordination failure as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn from_error(err: &MinirpcError) -> Self {
        let (kind, message) = match err {
            MinirpcError::NoNode(path) => (ErrorKind::NoNode, path.clone()),
            MinirpcError::NodeExists(path) => (ErrorKind::NodeExists, path.clone()),
            MinirpcError::NotEmpty(path) => (ErrorKind::NotEmpty, path.clone()),
            MinirpcError::SessionClosed => (ErrorKind::SessionClosed, String::new()),
            MinirpcError::Config(message) => (ErrorKind::Invalid, message.clone()),
            other => (ErrorKind::Invalid, other.to_string()),
        };
        Self { kind, message }
    }

    pub fn into_error(self) -> MinirpcError {
        match self.kind {
            ErrorKind::NoNode => MinirpcError::NoNode(self.message),
            ErrorKind::NodeExists => MinirpcError::NodeExists(self.message),
            ErrorKind::NotEmpty => MinirpcError::NotEmpty(self.message),
            ErrorKind::SessionClosed => MinirpcError::SessionClosed,
            ErrorKind::Invalid => MinirpcError::Config(self.message),
        }
    }
}

impl Outcome {
    pub fn from_result<T>(result: Result<T>, ok: impl FnOnce(T) -> Outcome) -> Self {
        match result {
            Ok(value) => ok(value),
            Err(e) => Outcome::Failed(WireError::from_error(&e)),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| MinirpcError::Serialization(format!("Malformed coordination message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = CoordRequest::Create {
            path: "/services/Calc/h:1".to_string(),
            mode: CreateMode::Ephemeral,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"op": "create", "path": "/services/Calc/h:1", "mode": "ephemeral"})
        );

        let close: CoordRequest = decode(br#"{"op": "close"}"#).unwrap();
        assert_eq!(close, CoordRequest::Close);
    }

    #[test]
    fn test_event_wire_shape() {
        let message = CoordMessage::Event {
            watch_id: 3,
            event: WatchEvent::ChildrenChanged {
                path: "/services/Calc".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "event",
                "watch_id": 3,
                "event": {"kind": "children_changed", "path": "/services/Calc"}
            })
        );
    }

    #[test]
    fn test_errors_keep_their_variant() {
        let errors = [
            MinirpcError::NoNode("/a".to_string()),
            MinirpcError::NodeExists("/a".to_string()),
            MinirpcError::NotEmpty("/a".to_string()),
            MinirpcError::SessionClosed,
            MinirpcError::Config("Invalid node path 'a'".to_string()),
        ];
        for err in errors {
            let expected = err.to_string();
            let wire: WireError = decode(&encode(&WireError::from_error(&err)).unwrap()).unwrap();
            assert_eq!(wire.into_error().to_string(), expected);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        let err = decode::<CoordRequest>(br#"{"op": "rename", "path": "/a"}"#).unwrap_err();
        assert!(matches!(err, MinirpcError::Serialization(_)));
    }
}

//! Wire envelope for the realtime stream
//!
//! The layer only distinguishes liveness frames from data frames:
//!
//! ```text
//! {"type": "ping", "timestamp": 1700000000000}     liveness ping
//! {"type": "pong", "timestamp": 1700000000000}     liveness acknowledgment
//! {"type": "metrics", "timestamp": ..., ...}       anything else is data
//! ```
//!
//! Data frames are passed through untouched; their schema belongs to the backend.

use super::errors::LinkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Liveness envelope (`ping` / `pong`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LivenessFrame {
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
}

impl LivenessFrame {
    /// Serialize to the text form sent over the wire
    pub fn to_text(&self) -> String {
        match self {
            LivenessFrame::Ping { timestamp } => {
                format!(r#"{{"type":"ping","timestamp":{}}}"#, timestamp)
            }
            LivenessFrame::Pong { timestamp } => {
                format!(r#"{{"type":"pong","timestamp":{}}}"#, timestamp)
            }
        }
    }
}

/// A data frame as received from the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Backend-assigned event identifier, when present
    pub id: Option<String>,
    /// Source timestamp in milliseconds, when present
    pub timestamp: Option<u64>,
    /// The full JSON object
    pub payload: Value,
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Liveness(LivenessFrame),
    Data(DataFrame),
}

impl Frame {
    /// Parse one inbound text frame
    ///
    /// Fails with `MalformedFrame` when the text is not a JSON object, or when a
    /// liveness frame lacks its timestamp.
    pub fn parse(text: &str) -> Result<Frame, LinkError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| LinkError::malformed(format!("invalid JSON: {}", e)))?;

        let obj = value
            .as_object()
            .ok_or_else(|| LinkError::malformed("expected a JSON object"))?;

        match obj.get("type").and_then(Value::as_str) {
            Some("ping") | Some("pong") => {
                let liveness: LivenessFrame = serde_json::from_value(value)
                    .map_err(|e| LinkError::malformed(format!("invalid liveness frame: {}", e)))?;
                Ok(Frame::Liveness(liveness))
            }
            _ => {
                let id = obj.get("id").and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                let timestamp = obj.get("timestamp").and_then(Value::as_u64);
                Ok(Frame::Data(DataFrame {
                    id,
                    timestamp,
                    payload: value,
                }))
            }
        }
    }

    /// Whether this is a liveness frame
    pub fn is_liveness(&self) -> bool {
        matches!(self, Frame::Liveness(_))
    }
}

//! Wire types for both channels.
//!
//! Control channel: JSON request bodies and the `{success, error, result}`
//! response envelope.
//!
//! Persistent channel: newline-delimited frames. Each frame is a JSON object
//! with a `type` discriminator; only `type = "message"` is delivered. The
//! server also writes a bare `success` line as a liveness acknowledgement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CallKind, ClientError, Result};

/// Bare non-JSON line the server sends to acknowledge liveness.
pub const LIVENESS_ACK: &str = "success";

// =============================================================================
// Control channel
// =============================================================================

/// Response envelope returned by every control endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// Older servers spell this key `succes`.
    #[serde(default, alias = "succes")]
    pub success: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl Envelope {
    /// Check `success` and decode `result` into `T`.
    ///
    /// `result` is not looked at when `success` is false.
    pub fn into_result<T: serde::de::DeserializeOwned>(self, kind: CallKind) -> Result<T> {
        self.check(kind)?;
        let value = self
            .result
            .ok_or_else(|| ClientError::ProtocolViolation("response has no result".into()))?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::ProtocolViolation(format!("malformed result: {e}")))
    }

    /// Check `success` for endpoints whose result carries nothing.
    pub fn check(&self, kind: CallKind) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let reason = self.error.trim();
        if reason.is_empty() {
            Err(ClientError::ProtocolViolation(
                "request failed without an error message".into(),
            ))
        } else {
            Err(ClientError::from_server_message(kind, reason))
        }
    }
}

/// Body of `/reg`, `/get_token` and `/auth`.
#[derive(Debug, Serialize)]
pub struct CredentialRequest<'a> {
    pub name: &'a str,
    pub pass: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub peer_name: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct IsOnlineRequest<'a> {
    pub name: &'a str,
}

/// `result` of a successful auth call.
#[derive(Debug, Deserialize)]
pub struct TokenResult {
    pub token: String,
}

/// `result` of `/is_online`. Both flags are required.
#[derive(Debug, Deserialize)]
pub struct PresenceResult {
    pub is: bool,
    pub exists: bool,
}

// =============================================================================
// Persistent channel
// =============================================================================

/// A chat message received from a peer.
///
/// `message` frames that carry an `error` are never delivered as messages;
/// ingest surfaces them as `Notice::RemoteError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Outcome of decoding one line from the persistent channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chat message to deliver.
    Message(InboundMessage),
    /// A `message` frame whose `error` field was set.
    RemoteError { from: String, error: String },
    /// The bare liveness acknowledgement.
    Ack,
    /// Valid JSON object with a missing or unrecognised `type`.
    Ignored { kind: Option<String> },
    /// Not JSON, not the acknowledgement, or a `message` frame with the wrong
    /// shape.
    Malformed { raw: String, reason: String },
}

/// Only the discriminator; every other key is ignored at this stage.
#[derive(Deserialize)]
struct Discriminator {
    #[serde(rename = "type", default)]
    kind: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MessageFrame {
    from_name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one newline-stripped line.
pub fn decode_frame(line: &str) -> Frame {
    let discriminator = match serde_json::from_str::<Discriminator>(line) {
        Ok(d) => d,
        Err(e) => {
            if line.trim() == LIVENESS_ACK {
                return Frame::Ack;
            }
            return Frame::Malformed {
                raw: line.to_string(),
                reason: e.to_string(),
            };
        }
    };

    let kind = match discriminator.kind {
        Some(serde_json::Value::String(kind)) => kind,
        _ => return Frame::Ignored { kind: None },
    };

    if kind != "message" {
        return Frame::Ignored { kind: Some(kind) };
    }

    match serde_json::from_str::<MessageFrame>(line) {
        Ok(frame) => match frame.error.filter(|e| !e.is_empty()) {
            Some(error) => Frame::RemoteError {
                from: frame.from_name,
                error,
            },
            None => Frame::Message(InboundMessage {
                from: frame.from_name,
                body: frame.message,
                received_at: Utc::now(),
            }),
        },
        Err(e) => Frame::Malformed {
            raw: line.to_string(),
            reason: e.to_string(),
        },
    }
}

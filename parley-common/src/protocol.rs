//! Wire protocol for Parley
//!
//! Every frame on the real-time connection is one JSON object:
//!
//! ```json
//! {"type": 0, "payload": {"conversation_metadata": {...}, "message": {...}, "recipients": ["bob"]}}
//! ```
//!
//! The `type` field is an integer discriminant. Decoding resolves it exactly
//! once into an [`Envelope`] variant; an unknown code is a fatal protocol
//! error for the connection that sent it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::conversation::{ConversationMetadata, Message};

/// Numeric discriminant carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    SendChatMessage,
    NotifyConnection,
}

impl EnvelopeType {
    /// Wire code for this envelope type
    pub fn code(self) -> u64 {
        match self {
            EnvelopeType::SendChatMessage => 0,
            EnvelopeType::NotifyConnection => 1,
        }
    }

    /// Resolve a wire code, returning `None` for codes this build does not know
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(EnvelopeType::SendChatMessage),
            1 => Some(EnvelopeType::NotifyConnection),
            _ => None,
        }
    }
}

/// Chat message addressed to a set of recipients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendChatMessage {
    pub conversation_metadata: ConversationMetadata,
    pub message: Message,
    pub recipients: Vec<String>,
}

/// Presence change for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConnection {
    pub username: String,
    pub connected: bool,
}

/// Decoded wire envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    SendChatMessage(SendChatMessage),
    NotifyConnection(NotifyConnection),
}

/// Errors produced while encoding or decoding envelopes
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The `type` field holds a code with no known payload variant
    #[error("unknown envelope type {0}")]
    UnknownType(u64),
    /// The frame is not a well-formed envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Envelope as it appears on the wire, before the payload is resolved
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: u64,
    payload: Value,
}

impl Envelope {
    /// The discriminant of this envelope
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Envelope::SendChatMessage(_) => EnvelopeType::SendChatMessage,
            Envelope::NotifyConnection(_) => EnvelopeType::NotifyConnection,
        }
    }

    /// Encode to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let payload = match self {
            Envelope::SendChatMessage(p) => serde_json::to_value(p)?,
            Envelope::NotifyConnection(p) => serde_json::to_value(p)?,
        };
        let raw = RawEnvelope {
            kind: self.envelope_type().code(),
            payload,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decode a JSON frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownType` if `type` is not a known code
    /// - `ProtocolError::Malformed` if the JSON or the payload shape is invalid
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        let kind = EnvelopeType::from_code(raw.kind).ok_or(ProtocolError::UnknownType(raw.kind))?;
        Ok(match kind {
            EnvelopeType::SendChatMessage => Envelope::SendChatMessage(payload(raw.payload)?),
            EnvelopeType::NotifyConnection => Envelope::NotifyConnection(payload(raw.payload)?),
        })
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(value)?)
}

impl From<SendChatMessage> for Envelope {
    fn from(value: SendChatMessage) -> Self {
        Envelope::SendChatMessage(value)
    }
}

impl From<NotifyConnection> for Envelope {
    fn from(value: NotifyConnection) -> Self {
        Envelope::NotifyConnection(value)
    }
}

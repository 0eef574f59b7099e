//! Wire protocol envelopes.
//!
//! The envelope type set is closed: `subscribe`, `ping`, `pong`,
//! `request_update`, `initial_data`, `data_update`, `auto_update`, `error`.
//! Anything else decodes to a [`DecodeError`] result; it never surfaces as a
//! panic or an unhandled error across module boundaries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::StatsSnapshot;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guild_id: Option<u64>,
    },
    Ping,
    RequestUpdate,
}

/// Messages sent from server to client.
///
/// `initial_data`, `data_update` and `auto_update` carry an identical
/// snapshot payload and differ only in their tag, so clients may treat them
/// uniformly or distinctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    InitialData { data: StatsSnapshot },
    DataUpdate { data: StatsSnapshot },
    AutoUpdate { data: StatsSnapshot },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Decoding failure for an inbound text frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound text frame into a typed envelope.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

/// A frame queued for delivery to one session.
///
/// Fan-out paths serialize the envelope once and share the text across all
/// subscribers; single-recipient paths carry the raw envelope.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Raw(ServerMessage),
    Shared(Arc<str>),
}

impl OutboundFrame {
    /// Serialize a message once for sharing across many sends.
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Shared(serde_json::to_string(message)?.into()))
    }

    /// The frame's wire text.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Shared(text) => Ok(text.to_string()),
        }
    }
}

impl From<ServerMessage> for OutboundFrame {
    fn from(message: ServerMessage) -> Self {
        Self::Raw(message)
    }
}

//! Wire-format events and client commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Server → Client events
// ---------------------------------------------------------------------------

/// Sub-stage of a generation run reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStageKind {
    Retrieval,
    Chain,
}

/// The typed body of a wire event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    GenerationStarted {
        model: String,
    },
    Token {
        text: String,
    },
    GenerationCompleted {
        result: Value,
    },
    GenerationFailed {
        reason: String,
    },
    SubStageStarted {
        kind: SubStageKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    SubStageCompleted {
        kind: SubStageKind,
        summary: String,
    },
    TypingIndicator {
        active: bool,
    },
    MessageUpdate {
        message_id: String,
        content: String,
    },
    Joined {},
    Left {},
    Denied {
        reason: String,
    },
}

/// An event as sent to clients: the typed body plus the channel it belongs
/// to and a server timestamp, stamped once at build time.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    #[serde(flatten)]
    pub event: EventPayload,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WireEvent {
    pub fn new(channel_id: impl Into<String>, event: EventPayload) -> Self {
        Self {
            event,
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Handshake acknowledgement sent once after a successful authenticate.
/// Not a channel event, so it carries no `channel_id`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyMessage {
    pub r#type: &'static str,
    pub connection_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ReadyMessage {
    pub fn new(connection_id: &str, user_id: &str, organization_id: &str) -> Self {
        Self {
            r#type: "ready",
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server commands
// ---------------------------------------------------------------------------

/// A command received from the client over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Authenticate { credential: String },
    JoinChannel { channel_id: String },
    LeaveChannel { channel_id: String },
}

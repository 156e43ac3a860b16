// WebSocket event types for the parley gateway.
//
// Frames are JSON text, adjacently tagged: {"event": <name>, "data": <payload>}.

use serde::{Deserialize, Serialize};

use crate::types::MessageRecord;

/// Query parameter carrying the user identity on the upgrade request.
pub const USER_IDENTITY_QUERY_PARAM: &str = "userId";

/// All events exchanged over a gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    /// Client -> Server: the viewer has displayed a message.
    ///
    /// Missing fields decode as empty strings and are rejected by
    /// [`SeenEvent::parse`].
    #[serde(rename = "messageSeen", rename_all = "camelCase")]
    MessageSeen {
        #[serde(default)]
        message_id: String,
        #[serde(default)]
        user_id: String,
    },

    /// Server -> Client: every user identity currently online.
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers(Vec<String>),

    /// Server -> Client: a message you sent was seen.
    #[serde(rename = "seenNotification", rename_all = "camelCase")]
    SeenNotification { message_id: String, seen_by: String },

    /// Server -> Client: a message addressed to you was stored.
    #[serde(rename = "newMessage")]
    NewMessage(MessageRecord),
}

impl GatewayEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageSeen { .. } => "messageSeen",
            Self::GetOnlineUsers(_) => "getOnlineUsers",
            Self::SeenNotification { .. } => "seenNotification",
            Self::NewMessage(_) => "newMessage",
        }
    }

    /// True for events a client is allowed to send.
    pub const fn is_inbound(&self) -> bool {
        matches!(self, Self::MessageSeen { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SeenEventError {
    #[error("seen event is missing messageId")]
    MissingMessageId,
    #[error("seen event is missing userId")]
    MissingViewerId,
}

/// A validated (message, viewer) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenEvent {
    pub message_id: String,
    pub viewer_id: String,
}

impl SeenEvent {
    /// Both identifiers must be non-blank. They are kept exactly as sent, so
    /// the notification echoes the client's `messageId` verbatim. No check is
    /// made that the viewer is actually the message's receiver.
    pub fn parse(message_id: &str, viewer_id: &str) -> Result<Self, SeenEventError> {
        if message_id.trim().is_empty() {
            return Err(SeenEventError::MissingMessageId);
        }
        if viewer_id.trim().is_empty() {
            return Err(SeenEventError::MissingViewerId);
        }

        Ok(Self { message_id: message_id.to_owned(), viewer_id: viewer_id.to_owned() })
    }

    pub fn notification(&self) -> GatewayEvent {
        GatewayEvent::SeenNotification {
            message_id: self.message_id.clone(),
            seen_by: self.viewer_id.clone(),
        }
    }
}

pub fn decode_event(raw: &str) -> Result<GatewayEvent, serde_json::Error> {
    serde_json::from_str::<GatewayEvent>(raw)
}

pub fn encode_event(event: &GatewayEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

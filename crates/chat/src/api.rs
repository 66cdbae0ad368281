use crate::newtypes::{ChatRoomId, LocalUserId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChatEvent {
    #[serde(rename = "phx_join")]
    #[default]
    PhxJoin,
    #[serde(rename = "phx_leave")]
    PhxLeave,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "chat:message")]
    Message,
    #[serde(rename = "chat:ack")]
    Ack,
    #[serde(rename = "chat:update")]
    Update,
    #[serde(rename = "chat:read")]
    Read,
    #[serde(rename = "chat:typing")]
    Typing,
    #[serde(rename = "typing:start")]
    TypingStart,
    #[serde(rename = "typing:stop")]
    TypingStop,
    #[serde(rename = "presence:snapshot")]
    PresenceSnapshot,
    #[serde(rename = "presence:diff")]
    PresenceDiff,
    #[serde(rename = "ws:reconnected")]
    Reconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Retrying,
    Failed,
    Read,
}

/// A chat message as held in a room's message list: ordered by `created_at`,
/// deduplicated by `id`, merged from optimistic local inserts and server
/// confirmations.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: ChatRoomId,
    pub sender_id: LocalUserId,
    /// Opaque string; may be a JSON-encoded structured payload.
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

// ================= Payload structs =================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: LocalUserId,
    pub typing: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub reader_id: LocalUserId,
    pub last_read_message_id: Option<MessageId>,
    /// RFC3339; absent means "no cursor information", a deliberate no-op.
    pub last_read_at: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub client_id: Option<Uuid>,
    pub server_id: String,
    pub room_id: ChatRoomId,
    pub sender_id: LocalUserId,
}

/// Presence row. A positive `last_seen_at` (unix millis) means online since
/// that instant; a non-positive value means offline, last seen at `|value|`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshotItem {
    pub user_id: LocalUserId,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDiffPayload {
    #[serde(default)]
    pub upserts: Vec<PresenceSnapshotItem>,
    #[serde(default)]
    pub removes: Vec<LocalUserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSnapshotItem {
    pub room_id: ChatRoomId,
    pub unread_count: i64,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<DateTime<Utc>>,
}

// ================= IncomingEvent =================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event: ChatEvent,
    pub room_id: ChatRoomId,
    pub topic: String,
    pub payload: Value,
}

impl IncomingEvent {
    pub fn new(event: ChatEvent, room_id: ChatRoomId, payload: Value) -> Self {
        let topic = format!("room:{}", room_id);
        Self {
            event,
            room_id,
            topic,
            payload,
        }
    }
}

// ================= Structured message content =================

/// Workflow signal carried inside a message's `content` string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StructuredContent {
    QuoteProposed,
    ApproveOrder,
    StartWork,
    SubmitDelivery,
    RequestRevision,
    ReleasePayment,
    Cancel,
}

/// Interpreted message content: either a workflow signal or plain text.
/// Malformed JSON is never an error, just text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Structured(StructuredContent),
    Text(String),
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub url: String,
    pub name: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("missing field or invalid payload for event {0}")]
    InvalidPayload(&'static str),
}

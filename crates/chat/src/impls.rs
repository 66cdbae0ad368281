use crate::api::{ChatEvent, ChatMessage, ConvertError, MessageContent, MessageStatus, StructuredContent};
use crate::newtypes::{ChatRoomId, LocalUserId, MessageId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;

impl FromStr for MessageStatus {
    type Err = ConvertError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "retrying" => Ok(MessageStatus::Retrying),
            "failed" => Ok(MessageStatus::Failed),
            "read" => Ok(MessageStatus::Read),
            other => Err(ConvertError::UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for ChatEvent {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "phx_join" => ChatEvent::PhxJoin,
            "phx_leave" => ChatEvent::PhxLeave,
            "heartbeat" => ChatEvent::Heartbeat,
            "chat:message" => ChatEvent::Message,
            "chat:ack" => ChatEvent::Ack,
            "chat:update" => ChatEvent::Update,
            "chat:read" => ChatEvent::Read,
            "chat:typing" => ChatEvent::Typing,
            "typing:start" => ChatEvent::TypingStart,
            "typing:stop" => ChatEvent::TypingStop,
            "presence:snapshot" => ChatEvent::PresenceSnapshot,
            "presence:diff" => ChatEvent::PresenceDiff,
            "ws:reconnected" => ChatEvent::Reconnected,
            _ => ChatEvent::Unknown,
        })
    }
}

impl ChatEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatEvent::PhxJoin => "phx_join",
            ChatEvent::PhxLeave => "phx_leave",
            ChatEvent::Heartbeat => "heartbeat",
            ChatEvent::Message => "chat:message",
            ChatEvent::Ack => "chat:ack",
            ChatEvent::Update => "chat:update",
            ChatEvent::Read => "chat:read",
            ChatEvent::Typing => "chat:typing",
            ChatEvent::TypingStart => "typing:start",
            ChatEvent::TypingStop => "typing:stop",
            ChatEvent::PresenceSnapshot => "presence:snapshot",
            ChatEvent::PresenceDiff => "presence:diff",
            ChatEvent::Reconnected => "ws:reconnected",
            ChatEvent::Unknown => "unknown",
        }
    }
}

impl TryFrom<Value> for ChatMessage {
    type Error = ConvertError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|v| MessageId(v.to_string()))
            .ok_or(ConvertError::InvalidPayload("chat:message"))?;

        let room_id = value
            .get("roomId")
            .and_then(|v| v.as_str())
            .map(|v| ChatRoomId(v.to_string()))
            .ok_or(ConvertError::InvalidPayload("chat:message"))?;

        let sender_id = value
            .get("senderId")
            .and_then(|v| v.as_i64())
            .map(|v| LocalUserId(v as i32))
            .ok_or(ConvertError::InvalidPayload("chat:message"))?;

        let content = value
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let status = value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("sent")
            .parse::<MessageStatus>()
            .unwrap_or(MessageStatus::Sent);

        // Parse createdAt (RFC3339) into DateTime<Utc>
        let created_at: DateTime<Utc> = value
            .get("createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(ChatMessage {
            id,
            room_id,
            sender_id,
            content,
            status,
            created_at,
        })
    }
}

impl MessageContent {
    /// Interpret a message's `content` string. Anything that does not parse
    /// as a known workflow signal falls back to plain text.
    pub fn parse(content: &str) -> MessageContent {
        match serde_json::from_str::<StructuredContent>(content) {
            Ok(signal) => MessageContent::Structured(signal),
            Err(_) => MessageContent::Text(content.to_string()),
        }
    }
}

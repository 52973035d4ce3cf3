use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    domain::{DeliveryStatus, MessageId, MessageType, PresenceStatus, UserId},
    error::ProtocolError,
};

pub const SEND_MESSAGE_DESTINATION: &str = "/app/send";
pub const SEND_TYPING_DESTINATION: &str = "/app/typing";

const IMAGE_PREVIEW: &str = "Sent an image";

/// Broadcast channels the client listens on. Every subscriber, including the
/// original sender, receives each frame published to a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Typing,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Messages, Topic::Typing];

    pub fn destination(self) -> &'static str {
        match self {
            Topic::Messages => "/topic/messages",
            Topic::Typing => "/topic/typing",
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.destination() == destination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    /// Self-describing data URL for image messages.
    #[serde(default, rename = "imageData", skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(
        default,
        rename = "time",
        deserialize_with = "lenient_local_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub sent_at: Option<NaiveDateTime>,
    #[serde(default, rename = "status", skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default, rename = "isRead", alias = "read")]
    pub is_read: bool,
}

impl ChatMessage {
    pub fn text(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id,
            receiver_id,
            content: Some(content.into()),
            message_type: Some(MessageType::Text),
            attachment: None,
            sent_at: None,
            delivery_status: Some(DeliveryStatus::Sent),
            is_read: false,
        }
    }

    pub fn image(sender_id: UserId, receiver_id: UserId, data_url: String) -> Self {
        Self {
            id: None,
            sender_id,
            receiver_id,
            content: Some(String::new()),
            message_type: Some(MessageType::Image),
            attachment: Some(data_url),
            sent_at: None,
            delivery_status: Some(DeliveryStatus::Sent),
            is_read: false,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.message_type.unwrap_or_default()
    }

    pub fn body(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// True when the message travels between `a` and `b`, in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn is_seen(&self) -> bool {
        self.is_read || self.delivery_status == Some(DeliveryStatus::Seen)
    }

    /// Short text for notifications and conversation lists.
    pub fn preview(&self) -> &str {
        match self.kind() {
            MessageType::Image if self.attachment.is_some() => IMAGE_PREVIEW,
            _ => self.body(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    #[serde(default, deserialize_with = "lenient_local_datetime")]
    pub last_seen: Option<NaiveDateTime>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Message(ChatMessage),
    Typing(TypingPayload),
}

impl BrokerEvent {
    pub fn decode(destination: &str, body: &str) -> Result<Self, ProtocolError> {
        let topic = Topic::from_destination(destination)
            .ok_or_else(|| ProtocolError::UnknownTopic(destination.to_string()))?;
        let malformed = |source| ProtocolError::MalformedPayload {
            topic: topic.destination(),
            source,
        };
        match topic {
            Topic::Messages => serde_json::from_str(body)
                .map(BrokerEvent::Message)
                .map_err(malformed),
            Topic::Typing => serde_json::from_str(body)
                .map(BrokerEvent::Typing)
                .map_err(malformed),
        }
    }
}

/// The broker reports local date-times without an offset; anything that does
/// not parse, including non-string encodings, is treated as absent.
fn lenient_local_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(raw)) => parse_local_datetime(&raw),
        _ => None,
    })
}

pub fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = raw.parse::<NaiveDateTime>() {
        return Some(parsed);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Local).naive_local())
}

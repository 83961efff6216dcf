//! Domain model structs held by the in-memory stores.
//!
//! Every struct derives `Serialize` so it can be handed directly to the UI
//! layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinic_shared::{CorrelationId, MessageId, NotificationId, Peer, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// Identity of a message. A pending message is known only by its
/// correlation id until the server confirms it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MessageKey {
    Pending(CorrelationId),
    Confirmed(MessageId),
}

/// A single chat message in an open conversation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
    pub is_read: bool,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// A server-confirmed message.
    pub fn confirmed(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
        local: UserId,
    ) -> Self {
        Self {
            key: MessageKey::Confirmed(id),
            sender_id,
            receiver_id,
            body: body.into(),
            created_at,
            is_mine: sender_id == local,
            is_read: false,
            delivery_state: DeliveryState::Confirmed,
        }
    }

    pub fn id(&self) -> Option<MessageId> {
        match self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self.key {
            MessageKey::Pending(correlation_id) => Some(correlation_id),
            MessageKey::Confirmed(_) => None,
        }
    }

    /// The participant that is not `local`.
    pub fn counterpart(&self, local: UserId) -> UserId {
        if self.sender_id == local {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// A message as returned by `GET /conversations/{peer}` and `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(alias = "body", alias = "content")]
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl MessageRecord {
    pub fn into_message(self, local: UserId) -> Message {
        let mut message = Message::confirmed(
            self.id,
            self.sender_id,
            self.receiver_id,
            self.message,
            self.created_at,
            local,
        );
        message.is_read = self.is_read;
        message
    }
}

// ---------------------------------------------------------------------------
// Chat list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    /// Server id of the message, when the snapshot or push carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
}

/// Recency summary of the conversation with one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatListEntry {
    pub peer: Peer,
    pub last_message: LastMessage,
    #[serde(default)]
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
    Message,
    Appointment,
}

impl NotificationType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "message" => Some(Self::Message),
            "appointment" => Some(Self::Appointment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub related_type: Option<String>,
    pub related_id: Option<NotificationId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

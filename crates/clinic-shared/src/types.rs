use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::constants::{LOCAL_NOTIFICATION_PREFIX, USER_CHANNEL_PREFIX};

/// Ids arrive from the backend either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Str(String),
}

impl RawId {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            RawId::Num(n) => Ok(n),
            RawId::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected numeric id, got {s:?}"))),
        }
    }

    fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

// Internal user id as assigned by the backend.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer)?.into_u64().map(Self)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable external address of a user. Names that user's push channel and
/// addresses the conversation REST endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContactAddress(pub String);

impl<'de> Deserialize<'de> for ContactAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(RawId::deserialize(deserializer)?.into_string()))
    }
}

impl ContactAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_channel(&self) -> ChannelName {
        ChannelName(format!("{USER_CHANNEL_PREFIX}{}", self.0))
    }
}

impl std::fmt::Display for ContactAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a broadcast channel on the push transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelName(pub String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The contact address this channel belongs to, if it is a user channel.
    pub fn contact(&self) -> Option<ContactAddress> {
        self.0
            .strip_prefix(USER_CHANNEL_PREFIX)
            .filter(|rest| !rest.is_empty())
            .map(ContactAddress::new)
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The counterparty in a one-to-one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: UserId,
    pub contact: ContactAddress,
    pub name: Option<String>,
}

impl Peer {
    pub fn new(id: UserId, contact: ContactAddress) -> Self {
        Self {
            id,
            contact,
            name: None,
        }
    }

    /// A peer known only by id. Its contact address is filled in once a
    /// fuller record arrives.
    pub fn placeholder(id: UserId) -> Self {
        Self::new(id, ContactAddress::new(""))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.contact.is_empty()
    }

    /// Fill a missing contact address or name from `other`, the same user
    /// seen in a fuller record. Returns `true` if anything changed.
    pub fn fill_from(&mut self, other: &Peer) -> bool {
        if other.id != self.id {
            return false;
        }
        let mut changed = false;
        if self.contact.is_empty() && !other.contact.is_empty() {
            self.contact = other.contact.clone();
            changed = true;
        }
        if self.name.is_none() && other.name.is_some() {
            self.name = other.name.clone();
            changed = true;
        }
        changed
    }
}

/// The authenticated user of this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub contact: ContactAddress,
}

impl LocalUser {
    pub fn new(id: UserId, contact: ContactAddress) -> Self {
        Self { id, contact }
    }

    pub fn channel(&self) -> ChannelName {
        self.contact.to_channel()
    }
}

/// Server-assigned message id.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer)?.into_u64().map(Self)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated id of an optimistic message, unique per session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification id. Server ids are kept verbatim; ids minted locally carry
/// the `local-` prefix.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self(format!("{LOCAL_NOTIFICATION_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_NOTIFICATION_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(RawId::deserialize(deserializer)?.into_string()))
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

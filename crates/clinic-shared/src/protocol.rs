use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::{ContactAddress, LocalUser, MessageId, NotificationId, UserId};

/// Every push event the portal understands, decoded once at the dispatcher
/// boundary. Unrecognised event names decode to [`PushEvent::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A chat message was stored by the backend.
    MessageSent(ChatPayload),

    /// A notification was created for the receiving user.
    NotificationCreated(NotificationPayload),

    /// Something happened to an appointment the user takes part in.
    Appointment {
        kind: AppointmentEvent,
        payload: AppointmentPayload,
    },

    /// An event name with no binding in this client.
    Unknown { event: String },
}

/// The tag of a [`PushEvent`], used as the handler binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageSent,
    NotificationCreated,
    Appointment(AppointmentEvent),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEvent {
    Created,
    Updated,
    Cancelled,
    Reminder,
}

impl AppointmentEvent {
    pub const ALL: [AppointmentEvent; 4] = [
        AppointmentEvent::Created,
        AppointmentEvent::Updated,
        AppointmentEvent::Cancelled,
        AppointmentEvent::Reminder,
    ];

    /// Title used when the push carries none.
    pub fn default_title(&self) -> &'static str {
        match self {
            Self::Created => "Appointment booked",
            Self::Updated => "Appointment updated",
            Self::Cancelled => "Appointment cancelled",
            Self::Reminder => "Appointment reminder",
        }
    }
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            EVENT_MESSAGE_SENT => Self::MessageSent,
            EVENT_NOTIFICATION_CREATED => Self::NotificationCreated,
            EVENT_APPOINTMENT_CREATED => Self::Appointment(AppointmentEvent::Created),
            EVENT_APPOINTMENT_UPDATED => Self::Appointment(AppointmentEvent::Updated),
            EVENT_APPOINTMENT_CANCELLED => Self::Appointment(AppointmentEvent::Cancelled),
            EVENT_APPOINTMENT_REMINDER => Self::Appointment(AppointmentEvent::Reminder),
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent => EVENT_MESSAGE_SENT,
            Self::NotificationCreated => EVENT_NOTIFICATION_CREATED,
            Self::Appointment(AppointmentEvent::Created) => EVENT_APPOINTMENT_CREATED,
            Self::Appointment(AppointmentEvent::Updated) => EVENT_APPOINTMENT_UPDATED,
            Self::Appointment(AppointmentEvent::Cancelled) => EVENT_APPOINTMENT_CANCELLED,
            Self::Appointment(AppointmentEvent::Reminder) => EVENT_APPOINTMENT_REMINDER,
            Self::Unknown => "unknown",
        }
    }
}

/// One side of a chat message as described by the push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub id: Option<UserId>,
    pub contact: Option<ContactAddress>,
    pub name: Option<String>,
}

impl Participant {
    pub fn is(&self, user: &LocalUser) -> bool {
        self.id == Some(user.id) || self.contact.as_ref() == Some(&user.contact)
    }

    fn has_routing(&self) -> bool {
        self.id.is_some() || self.contact.is_some()
    }
}

/// Payload of `message.sent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatPayload {
    pub id: MessageId,
    #[serde(alias = "body", alias = "content")]
    pub message: String,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub sender_contact_number: Option<ContactAddress>,
    #[serde(default)]
    pub receiver_contact_number: Option<ContactAddress>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub receiver_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatPayload {
    pub fn sender(&self) -> Participant {
        Participant {
            id: self.sender_id,
            contact: self.sender_contact_number.clone(),
            name: self.sender_name.clone(),
        }
    }

    pub fn receiver(&self) -> Participant {
        Participant {
            id: self.receiver_id,
            contact: self.receiver_contact_number.clone(),
            name: self.receiver_name.clone(),
        }
    }

    /// Whether the local user wrote this message.
    pub fn is_from(&self, user: &LocalUser) -> bool {
        self.sender().is(user)
    }

    /// The participant that is not the local user, or `None` when the
    /// local user is on neither side.
    pub fn counterpart(&self, user: &LocalUser) -> Option<Participant> {
        let sender = self.sender();
        let receiver = self.receiver();
        if sender.is(user) {
            Some(receiver)
        } else if receiver.is(user) {
            Some(sender)
        } else {
            None
        }
    }
}

/// Payload of `notification.created`, also the shape returned by
/// `GET /notifications`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub id: Option<NotificationId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub related_type: Option<String>,
    #[serde(default)]
    pub related_id: Option<NotificationId>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload of the `appointment.*` events. `id` is the appointment's id,
/// not a notification id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppointmentPayload {
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notification_id: Option<NotificationId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AppointmentPayload {
    /// Recast as a notification so the notification center can classify it.
    ///
    /// Without a backend `notification_id` the id is derived from the event
    /// and the appointment, so a redelivered event replaces its earlier
    /// entry. Derived ids are local and never synced.
    pub fn to_notification(&self, kind: AppointmentEvent) -> NotificationPayload {
        let id = self.notification_id.clone().unwrap_or_else(|| {
            NotificationId::new(format!(
                "{LOCAL_NOTIFICATION_PREFIX}{}:{}",
                EventKind::Appointment(kind).name(),
                self.id
            ))
        });
        NotificationPayload {
            id: Some(id),
            title: Some(
                self.title
                    .clone()
                    .unwrap_or_else(|| kind.default_title().to_string()),
            ),
            message: self.message.clone(),
            kind: None,
            related_type: Some(RELATED_APPOINTMENT.to_string()),
            related_id: Some(self.id.clone()),
            is_read: false,
            created_at: self.created_at,
        }
    }
}

impl PushEvent {
    /// Decode a raw transport payload tagged with `event`.
    pub fn decode(event: &str, data: &Value) -> Result<Self, ProtocolError> {
        let malformed = |source| ProtocolError::Malformed {
            event: event.to_string(),
            source,
        };

        match EventKind::from_name(event) {
            EventKind::MessageSent => {
                let payload: ChatPayload =
                    serde_json::from_value(unwrap_envelope(data, "message").clone())
                        .map_err(malformed)?;
                if !payload.sender().has_routing() || !payload.receiver().has_routing() {
                    return Err(ProtocolError::MissingRouting(event.to_string()));
                }
                Ok(Self::MessageSent(payload))
            }
            EventKind::NotificationCreated => {
                let payload =
                    serde_json::from_value(unwrap_envelope(data, "notification").clone())
                        .map_err(malformed)?;
                Ok(Self::NotificationCreated(payload))
            }
            EventKind::Appointment(kind) => {
                let payload = serde_json::from_value(unwrap_envelope(data, "appointment").clone())
                    .map_err(malformed)?;
                Ok(Self::Appointment { kind, payload })
            }
            EventKind::Unknown => Ok(Self::Unknown {
                event: event.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::NotificationCreated(_) => EventKind::NotificationCreated,
            Self::Appointment { kind, .. } => EventKind::Appointment(*kind),
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// The payload as a notification, for event types that feed the
    /// notification center.
    pub fn as_notification(&self) -> Option<NotificationPayload> {
        match self {
            Self::NotificationCreated(payload) => Some(payload.clone()),
            Self::Appointment { kind, payload } => Some(payload.to_notification(*kind)),
            _ => None,
        }
    }
}

/// Broadcasters sometimes wrap the model under its name
/// (`{"message": {...}}`); accept both shapes.
fn unwrap_envelope<'a>(data: &'a Value, key: &str) -> &'a Value {
    match data.get(key) {
        Some(inner @ Value::Object(_)) => inner,
        _ => data,
    }
}

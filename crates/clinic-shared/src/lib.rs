//! Types shared by every clinic portal crate: identities, channel naming,
//! the decoded push-event protocol and the common error enums.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{
    AppointmentEvent, AppointmentPayload, ChatPayload, EventKind, NotificationPayload,
    Participant, PushEvent,
};
pub use types::{
    ChannelName, ConnectionState, ContactAddress, CorrelationId, LocalUser, MessageId,
    NotificationId, Peer, UserId,
};

//! Fire-and-forget UI side effects (toasts, badges, connection banners).
//!
//! The session reports what changed through an injected [`UiObserver`]; the
//! state machines themselves never call into the UI.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use clinic_shared::{ConnectionState, CorrelationId, NotificationId, UserId};
use clinic_store::NotificationType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// An inbound message for a conversation that is not focused.
    MessageReceived { peer_id: UserId, preview: String },
    ConversationChanged { peer_id: UserId },
    ChatListChanged { total_unread: u32 },
    NotificationAdded {
        id: NotificationId,
        title: String,
        kind: NotificationType,
    },
    UnreadChanged { unread: usize },
    /// The generic "could not send" indicator.
    SendFailed {
        peer_id: UserId,
        correlation_id: CorrelationId,
        body: String,
    },
    SyncFailed { action: String, error: String },
    ConnectionChanged { state: ConnectionState },
}

pub trait UiObserver: Send + Sync {
    fn notify(&self, event: &UiEvent);
}

/// Discards every event.
pub struct NoopObserver;

impl UiObserver for NoopObserver {
    fn notify(&self, _event: &UiEvent) {}
}

/// Logs every event.
pub struct LogObserver;

impl UiObserver for LogObserver {
    fn notify(&self, event: &UiEvent) {
        tracing::info!(?event, "UI event");
    }
}

/// Forwards events into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiObserver for ChannelObserver {
    fn notify(&self, event: &UiEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!("UI event receiver dropped");
        }
    }
}

pub fn channel_observer() -> (Arc<ChannelObserver>, mpsc::UnboundedReceiver<UiEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelObserver { tx }), rx)
}

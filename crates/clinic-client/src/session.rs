//! Session lifecycle and the inbound push bridge.
//!
//! A [`Session`] owns one transport connection for one signed-in user. On
//! start it subscribes the user's own channel, spawns the loop that turns
//! transport notifications into handler calls, and bootstraps the chat list
//! and notification feed over REST. Teardown (explicit or on drop) releases
//! every subscription and closes the transport.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use clinic_net::{
    ChannelRegistry, DebugSink, HandlerError, Handlers, Subscription, SubscriptionState,
    TransportHandle, TransportNotification,
};
use clinic_shared::{
    AppointmentEvent, ChannelName, ChatPayload, ConnectionState, EventKind, LocalUser, Peer,
    PushEvent,
};
use clinic_store::{ChatActivity, Message};

use crate::api::PortalApi;
use crate::error::SessionError;
use crate::events::{UiEvent, UiObserver};
use crate::state::SessionState;

/// Event kinds that feed the notification center.
const NOTIFICATION_EVENTS: [EventKind; 5] = [
    EventKind::NotificationCreated,
    EventKind::Appointment(AppointmentEvent::Created),
    EventKind::Appointment(AppointmentEvent::Updated),
    EventKind::Appointment(AppointmentEvent::Cancelled),
    EventKind::Appointment(AppointmentEvent::Reminder),
];

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, SessionError> {
    mutex.lock().map_err(|_| SessionError::StatePoisoned)
}

pub struct Session {
    pub(crate) local: LocalUser,
    pub(crate) state: Arc<Mutex<SessionState>>,
    pub(crate) registry: Arc<Mutex<ChannelRegistry>>,
    pub(crate) api: Arc<dyn PortalApi>,
    pub(crate) observer: Arc<dyn UiObserver>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start a session on an already spawned transport.
    ///
    /// Bootstrap fetch failures are reported to the observer and logged but
    /// do not prevent the session from starting.
    pub async fn start(
        local: LocalUser,
        transport: TransportHandle,
        notif_rx: mpsc::Receiver<TransportNotification>,
        api: Arc<dyn PortalApi>,
        observer: Arc<dyn UiObserver>,
        debug_sink: Option<DebugSink>,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(Mutex::new(SessionState::new(local.clone())));

        let mut registry = ChannelRegistry::new(transport);
        if let Some(sink) = debug_sink {
            registry = registry.with_debug_sink(sink);
        }
        registry.subscribe(&local.channel(), inbound_handlers(&state, &observer))?;
        let registry = Arc::new(Mutex::new(registry));

        let bridge = tokio::spawn(bridge_loop(registry.clone(), observer.clone(), notif_rx));

        let session = Self {
            local,
            state,
            registry,
            api,
            observer,
            bridge: Mutex::new(Some(bridge)),
        };
        info!(
            user = %session.local.id,
            channel = %session.local.channel(),
            "Session started"
        );

        if let Err(e) = session.refresh_chat_list().await {
            warn!(error = %e, "Chat list bootstrap failed");
        }
        if let Err(e) = session.refresh_notifications().await {
            warn!(error = %e, "Notification bootstrap failed");
        }

        Ok(session)
    }

    pub fn local(&self) -> &LocalUser {
        &self.local
    }

    /// Read session state under its lock.
    pub fn snapshot<R>(&self, f: impl FnOnce(&SessionState) -> R) -> Result<R, SessionError> {
        let guard = lock(&self.state)?;
        Ok(f(&guard))
    }

    pub fn connection_state(&self) -> Result<watch::Receiver<ConnectionState>, SessionError> {
        Ok(lock(&self.registry)?.connection_state())
    }

    pub fn subscription_state(
        &self,
        channel: &ChannelName,
    ) -> Result<Option<SubscriptionState>, SessionError> {
        Ok(lock(&self.registry)?.subscription_state(channel).cloned())
    }

    /// Subscribe an additional channel, or add handlers to one already
    /// subscribed.
    pub fn subscribe_channel(
        &self,
        channel: &ChannelName,
        handlers: Handlers,
    ) -> Result<Subscription, SessionError> {
        Ok(lock(&self.registry)?.subscribe(channel, handlers)?)
    }

    pub fn unsubscribe_channel(&self, channel: &ChannelName) -> Result<(), SessionError> {
        lock(&self.registry)?.unsubscribe(channel);
        Ok(())
    }

    /// Release every subscription, close the transport and stop the bridge.
    /// Handlers already running finish; nothing runs afterwards.
    pub fn teardown(&self) -> Result<(), SessionError> {
        lock(&self.registry)?.teardown();
        if let Some(bridge) = lock(&self.bridge)?.take() {
            bridge.abort();
        }
        info!(user = %self.local.id, "Session torn down");
        Ok(())
    }

    pub(crate) fn emit(&self, event: UiEvent) {
        self.observer.notify(&event);
    }

    pub(crate) fn emit_all(&self, events: Vec<UiEvent>) {
        for event in &events {
            self.observer.notify(event);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let running = self
            .bridge
            .get_mut()
            .map(|bridge| bridge.is_some())
            .unwrap_or(false);
        if running {
            if let Err(e) = self.teardown() {
                error!(error = %e, "Session teardown on drop failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound bridge
// ---------------------------------------------------------------------------

/// Receive transport notifications, let the registry route them, and run
/// the selected handlers outside the registry lock.
async fn bridge_loop(
    registry: Arc<Mutex<ChannelRegistry>>,
    observer: Arc<dyn UiObserver>,
    mut notif_rx: mpsc::Receiver<TransportNotification>,
) {
    info!("Push bridge started");

    while let Some(notification) = notif_rx.recv().await {
        let state_change = match &notification {
            TransportNotification::StateChanged(state) => Some(*state),
            _ => None,
        };

        let routed = match registry.lock() {
            Ok(mut guard) => guard.route(notification),
            Err(_) => {
                error!("Registry lock poisoned, stopping push bridge");
                break;
            }
        };

        if let Some(state) = state_change {
            observer.notify(&UiEvent::ConnectionChanged { state });
        }

        if let Some(routed) = routed {
            let outcome = routed.deliver();
            debug!(
                channel = %routed.channel,
                event = routed.event.kind().name(),
                ?outcome,
                "Push event delivered"
            );
        }
    }

    warn!("Push bridge ended");
}

/// Handlers bound on the user's own channel. The conversation view, the
/// chat list and the notification feed each get their own handler so a
/// failure in one projection leaves the others intact.
fn inbound_handlers(state: &Arc<Mutex<SessionState>>, observer: &Arc<dyn UiObserver>) -> Handlers {
    let (conversation_state, conversation_observer) = (state.clone(), observer.clone());
    let (list_state, list_observer) = (state.clone(), observer.clone());
    let (feed_state, feed_observer) = (state.clone(), observer.clone());

    Handlers::new()
        .on(EventKind::MessageSent, move |event| {
            apply_to_conversation(&conversation_state, conversation_observer.as_ref(), event)
        })
        .on(EventKind::MessageSent, move |event| {
            apply_to_chat_list(&list_state, list_observer.as_ref(), event)
        })
        .on_each(&NOTIFICATION_EVENTS, move |event| {
            apply_to_notifications(&feed_state, feed_observer.as_ref(), event)
        })
}

fn lock_state(state: &Mutex<SessionState>) -> Result<MutexGuard<'_, SessionState>, HandlerError> {
    state
        .lock()
        .map_err(|_| HandlerError::new("session state lock poisoned"))
}

fn notify_all(observer: &dyn UiObserver, events: Vec<UiEvent>) {
    for event in &events {
        observer.notify(event);
    }
}

/// Resolve the counterpart of a chat payload and build the confirmed
/// message. `None` when the message is not addressed to the local user.
fn resolve_chat(
    state: &mut SessionState,
    chat: &ChatPayload,
) -> Result<Option<(Peer, Message)>, HandlerError> {
    let Some(counterpart) = chat.counterpart(&state.local) else {
        debug!(msg_id = %chat.id, "Message does not involve this user, skipped");
        return Ok(None);
    };
    let peer = state.peers.resolve(&counterpart).ok_or_else(|| {
        HandlerError::new(format!("cannot resolve peer of message {}", chat.id))
    })?;

    let local = state.local.id;
    let (sender, receiver) = if chat.is_from(&state.local) {
        (local, peer.id)
    } else {
        (peer.id, local)
    };
    let created_at = chat.created_at.unwrap_or_else(Utc::now);
    let message = Message::confirmed(chat.id, sender, receiver, &chat.message, created_at, local);
    Ok(Some((peer, message)))
}

fn apply_to_conversation(
    state: &Mutex<SessionState>,
    observer: &dyn UiObserver,
    event: &PushEvent,
) -> Result<(), HandlerError> {
    let PushEvent::MessageSent(chat) = event else {
        return Ok(());
    };

    let events = {
        let mut guard = lock_state(state)?;
        let Some((peer, message)) = resolve_chat(&mut guard, chat)? else {
            return Ok(());
        };
        if guard.conversations.apply_inbound(message) {
            vec![UiEvent::ConversationChanged { peer_id: peer.id }]
        } else {
            Vec::new()
        }
    };

    notify_all(observer, events);
    Ok(())
}

fn apply_to_chat_list(
    state: &Mutex<SessionState>,
    observer: &dyn UiObserver,
    event: &PushEvent,
) -> Result<(), HandlerError> {
    let PushEvent::MessageSent(chat) = event else {
        return Ok(());
    };

    let events = {
        let mut guard = lock_state(state)?;
        let Some((peer, message)) = resolve_chat(&mut guard, chat)? else {
            return Ok(());
        };
        let activity = ChatActivity {
            message_id: message.id(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body.clone(),
            created_at: message.created_at,
        };
        let focused = guard.focused;
        if !guard.chat_list.on_event(&activity, &peer, focused) {
            return Ok(());
        }

        let mut events = vec![UiEvent::ChatListChanged {
            total_unread: guard.chat_list.total_unread(),
        }];
        if !message.is_mine && focused != Some(peer.id) {
            events.push(UiEvent::MessageReceived {
                peer_id: peer.id,
                preview: message.body,
            });
        }
        events
    };

    notify_all(observer, events);
    Ok(())
}

fn apply_to_notifications(
    state: &Mutex<SessionState>,
    observer: &dyn UiObserver,
    event: &PushEvent,
) -> Result<(), HandlerError> {
    let Some(payload) = event.as_notification() else {
        return Ok(());
    };

    let events = {
        let mut guard = lock_state(state)?;
        let Some(added) = guard.notifications.add_from_event(payload, Utc::now()).cloned() else {
            return Ok(());
        };
        vec![
            UiEvent::NotificationAdded {
                id: added.id,
                title: added.title,
                kind: added.kind,
            },
            UiEvent::UnreadChanged {
                unread: guard.notifications.unread_count(),
            },
        ]
    };

    notify_all(observer, events);
    Ok(())
}

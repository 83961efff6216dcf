//! Channel subscription lifecycle on top of a single transport connection.
//!
//! The registry is the only component that changes the transport's
//! subscription set. It owns the dispatcher bindings, tracks per-channel
//! subscription state, publishes the connection state on a watch channel
//! and replays every subscription after a reconnect.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use clinic_shared::{ChannelName, ConnectionState, PushEvent};

use crate::debug_sink::{DebugSink, RawEvent};
use crate::dispatcher::{self, DispatchOutcome, EventDispatcher, Handler, Handlers};
use crate::error::NetError;
use crate::transport::{TransportCommand, TransportHandle, TransportNotification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Requested, not yet confirmed by the transport.
    Pending,
    Active,
    /// Refused by the transport. Sibling channels are unaffected.
    Failed(String),
}

/// Handle returned by [`ChannelRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    channel: ChannelName,
    merged: bool,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// True when the channel was already registered and the handlers were
    /// added to the existing registration.
    pub fn merged(&self) -> bool {
        self.merged
    }
}

/// A decoded event together with the handlers it must be delivered to.
///
/// Produced under the registry's lock and invoked after it is released.
pub struct Routed {
    pub channel: ChannelName,
    pub event: PushEvent,
    pub handlers: Vec<Handler>,
}

impl Routed {
    pub fn deliver(&self) -> DispatchOutcome {
        dispatcher::invoke(&self.handlers, &self.channel, &self.event)
    }
}

pub struct ChannelRegistry {
    transport: TransportHandle,
    dispatcher: EventDispatcher,
    subscriptions: BTreeMap<ChannelName, SubscriptionState>,
    state_tx: watch::Sender<ConnectionState>,
    debug_sink: Option<DebugSink>,
    lost_connection: bool,
    torn_down: bool,
}

impl ChannelRegistry {
    pub fn new(transport: TransportHandle) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            transport,
            dispatcher: EventDispatcher::new(),
            subscriptions: BTreeMap::new(),
            state_tx,
            debug_sink: None,
            lost_connection: false,
            torn_down: false,
        }
    }

    pub fn with_debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Register `handlers` on `channel`.
    ///
    /// Subscribing to an already registered channel merges the handlers into
    /// the existing registration without touching the transport.
    pub fn subscribe(
        &mut self,
        channel: &ChannelName,
        handlers: Handlers,
    ) -> Result<Subscription, NetError> {
        if self.torn_down {
            return Err(NetError::TransportClosed);
        }

        if self.subscriptions.contains_key(channel) {
            debug!(
                channel = %channel,
                added = handlers.len(),
                "Already subscribed, merging handlers"
            );
            self.dispatcher.bind(channel, handlers);
            return Ok(Subscription {
                channel: channel.clone(),
                merged: true,
            });
        }

        self.transport
            .send(TransportCommand::Subscribe(channel.clone()))?;
        self.subscriptions
            .insert(channel.clone(), SubscriptionState::Pending);
        self.dispatcher.bind(channel, handlers);
        info!(channel = %channel, "Subscribing to channel");

        Ok(Subscription {
            channel: channel.clone(),
            merged: false,
        })
    }

    /// Stop delivering events for `channel` and release its transport
    /// subscription. Unknown channels are ignored.
    pub fn unsubscribe(&mut self, channel: &ChannelName) {
        if self.subscriptions.remove(channel).is_none() {
            debug!(channel = %channel, "Unsubscribe for unknown channel ignored");
            return;
        }
        self.dispatcher.unbind(channel);
        if let Err(e) = self
            .transport
            .send(TransportCommand::Unsubscribe(channel.clone()))
        {
            debug!(channel = %channel, error = %e, "Transport gone during unsubscribe");
        }
        info!(channel = %channel, "Unsubscribed from channel");
    }

    /// Release every subscription and close the transport connection.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        let channels: Vec<ChannelName> = self.subscriptions.keys().cloned().collect();
        for channel in &channels {
            self.unsubscribe(channel);
        }
        let _ = self.transport.send(TransportCommand::Shutdown);
        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.torn_down = true;
        info!(released = channels.len(), "Channel registry torn down");
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscription_state(&self, channel: &ChannelName) -> Option<&SubscriptionState> {
        self.subscriptions.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelName> {
        self.subscriptions.keys()
    }

    pub fn is_subscribed(&self, channel: &ChannelName) -> bool {
        self.subscriptions.contains_key(channel)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Apply a transport notification to registry state. For events, returns
    /// the handlers to run; the caller invokes them via [`Routed::deliver`].
    pub fn route(&mut self, notification: TransportNotification) -> Option<Routed> {
        match notification {
            TransportNotification::StateChanged(state) => {
                self.on_state_changed(state);
                None
            }

            TransportNotification::SubscriptionSucceeded(channel) => {
                if let Some(entry) = self.subscriptions.get_mut(&channel) {
                    *entry = SubscriptionState::Active;
                    info!(channel = %channel, "Subscription active");
                }
                None
            }

            TransportNotification::SubscriptionFailed { channel, reason } => {
                if let Some(entry) = self.subscriptions.get_mut(&channel) {
                    warn!(channel = %channel, reason = %reason, "Subscription failed");
                    *entry = SubscriptionState::Failed(reason);
                }
                None
            }

            TransportNotification::Event {
                channel,
                event,
                data,
            } => self.route_event(RawEvent {
                channel,
                event,
                data,
            })
            .ok(),
        }
    }

    /// Route and deliver in one step. Only safe when handlers do not reach
    /// back into the registry. `None` for notifications that are not events.
    pub fn handle(&mut self, notification: TransportNotification) -> Option<DispatchOutcome> {
        match notification {
            TransportNotification::Event {
                channel,
                event,
                data,
            } => {
                let outcome = match self.route_event(RawEvent {
                    channel,
                    event,
                    data,
                }) {
                    Ok(routed) => routed.deliver(),
                    Err(outcome) => outcome,
                };
                Some(outcome)
            }
            other => {
                self.route(other);
                None
            }
        }
    }

    /// Decode a raw event and collect its handlers, or say why it goes
    /// nowhere.
    fn route_event(&mut self, raw: RawEvent) -> Result<Routed, DispatchOutcome> {
        match &self.debug_sink {
            Some(sink) => sink.offer(&raw),
            None => trace!(channel = %raw.channel, event = %raw.event, data = %raw.data, "Raw push event"),
        }

        if !self.dispatcher.is_bound(&raw.channel) {
            debug!(channel = %raw.channel, event = %raw.event, "Event on unsubscribed channel dropped");
            return Err(DispatchOutcome::NotSubscribed);
        }

        let decoded = match PushEvent::decode(&raw.event, &raw.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(channel = %raw.channel, error = %e, "Undecodable push event");
                return Err(DispatchOutcome::Undecodable);
            }
        };

        let handlers = self.dispatcher.handlers_for(&raw.channel, decoded.kind());
        if handlers.is_empty() {
            debug!(channel = %raw.channel, event = %raw.event, "No handler bound, event ignored");
            return Err(DispatchOutcome::Ignored);
        }

        Ok(Routed {
            channel: raw.channel,
            event: decoded,
            handlers,
        })
    }

    fn on_state_changed(&mut self, state: ConnectionState) {
        if self.torn_down {
            return;
        }
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Connection state changed");
        }

        match state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.lost_connection = true;
                for entry in self.subscriptions.values_mut() {
                    *entry = SubscriptionState::Pending;
                }
            }
            ConnectionState::Connected if self.lost_connection => {
                self.lost_connection = false;
                self.replay();
            }
            _ => {}
        }
    }

    fn replay(&mut self) {
        let mut replayed = 0;
        for (channel, entry) in self.subscriptions.iter_mut() {
            *entry = SubscriptionState::Pending;
            if let Err(e) = self
                .transport
                .send(TransportCommand::Subscribe(channel.clone()))
            {
                warn!(channel = %channel, error = %e, "Subscription replay failed");
                continue;
            }
            replayed += 1;
        }
        info!(count = replayed, "Replayed subscriptions after reconnect");
    }
}

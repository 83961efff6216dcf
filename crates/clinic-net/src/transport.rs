//! Push transport interface with tokio mpsc command/notification channels.
//!
//! The transport runs in its own tokio task. The channel registry drives it
//! through [`TransportCommand`]s and consumes [`TransportNotification`]s, so
//! any push backend can sit behind the same pair of channels. This module
//! ships the in-memory loopback backend used by tests and the replay tool.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use clinic_shared::{ChannelName, ConnectionState};

use crate::error::NetError;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    /// Open a transport-level subscription to a channel.
    Subscribe(ChannelName),
    /// Close the transport-level subscription to a channel.
    Unsubscribe(ChannelName),
    /// Close the connection and stop the task.
    Shutdown,
}

/// Notifications sent *from* the transport task to the registry.
#[derive(Debug, Clone)]
pub enum TransportNotification {
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// The server accepted a subscription.
    SubscriptionSucceeded(ChannelName),
    /// The server refused a subscription.
    SubscriptionFailed { channel: ChannelName, reason: String },
    /// An event was published on a subscribed channel.
    Event {
        channel: ChannelName,
        event: String,
        data: Value,
    },
}

/// Sending half of the transport command channel.
///
/// Unbounded so that subscribing stays synchronous for callers.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<TransportCommand>) -> Self {
        Self { cmd_tx }
    }

    pub fn send(&self, command: TransportCommand) -> Result<(), NetError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| NetError::TransportClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Loopback backend
// ---------------------------------------------------------------------------

enum HubCommand {
    Publish {
        channel: ChannelName,
        event: String,
        data: Value,
    },
    Disconnect,
    Fail(String),
    Reconnect,
    RejectNextSubscribe {
        channel: ChannelName,
        reason: String,
    },
    ActiveSubscriptions {
        channel: ChannelName,
        reply: oneshot::Sender<usize>,
    },
}

/// Server-side controls of a loopback transport.
#[derive(Debug, Clone)]
pub struct LoopbackHub {
    hub_tx: mpsc::UnboundedSender<HubCommand>,
}

impl LoopbackHub {
    fn send(&self, command: HubCommand) -> Result<(), NetError> {
        self.hub_tx
            .send(command)
            .map_err(|_| NetError::TransportClosed)
    }

    /// Publish `event` on `channel`. Delivered only if the channel has an
    /// active subscription while connected.
    pub fn publish(
        &self,
        channel: &ChannelName,
        event: &str,
        data: Value,
    ) -> Result<(), NetError> {
        self.send(HubCommand::Publish {
            channel: channel.clone(),
            event: event.to_string(),
            data,
        })
    }

    /// Drop the connection. The server forgets every subscription.
    pub fn disconnect(&self) -> Result<(), NetError> {
        self.send(HubCommand::Disconnect)
    }

    /// Drop the connection with an error.
    pub fn fail(&self, reason: &str) -> Result<(), NetError> {
        self.send(HubCommand::Fail(reason.to_string()))
    }

    /// Bring the connection back.
    pub fn reconnect(&self) -> Result<(), NetError> {
        self.send(HubCommand::Reconnect)
    }

    /// Refuse the next subscription attempt for `channel`.
    pub fn reject_next_subscribe(&self, channel: &ChannelName, reason: &str) -> Result<(), NetError> {
        self.send(HubCommand::RejectNextSubscribe {
            channel: channel.clone(),
            reason: reason.to_string(),
        })
    }

    /// Number of transport-level subscriptions currently open for `channel`.
    pub async fn active_subscriptions(&self, channel: &ChannelName) -> Result<usize, NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::ActiveSubscriptions {
            channel: channel.clone(),
            reply,
        })?;
        rx.await.map_err(|_| NetError::TransportClosed)
    }
}

/// Spawn an in-memory transport in a background tokio task.
///
/// Returns `(command_handle, notification_rx, hub)`. The transport starts
/// connected.
pub fn spawn_loopback(
    buffer: usize,
) -> (
    TransportHandle,
    mpsc::Receiver<TransportNotification>,
    LoopbackHub,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<TransportCommand>();
    let (hub_tx, mut hub_rx) = mpsc::unbounded_channel::<HubCommand>();
    let (notif_tx, notif_rx) = mpsc::channel::<TransportNotification>(buffer.max(1));

    tokio::spawn(async move {
        let mut connected = true;
        // Open subscriptions per channel. More than one means a client
        // subscribed twice at transport level.
        let mut active: HashMap<ChannelName, usize> = HashMap::new();
        let mut rejections: HashMap<ChannelName, String> = HashMap::new();

        let _ = notif_tx
            .send(TransportNotification::StateChanged(ConnectionState::Connecting))
            .await;
        let _ = notif_tx
            .send(TransportNotification::StateChanged(ConnectionState::Connected))
            .await;
        info!("Loopback transport connected");

        loop {
            tokio::select! {
                // Client commands win ties so a subscribe issued before a
                // publish is always opened first.
                biased;

                // --- Client commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Subscribe(channel)) => {
                            if !connected {
                                debug!(channel = %channel, "Subscribe while offline, awaiting replay");
                                continue;
                            }
                            if let Some(reason) = rejections.remove(&channel) {
                                warn!(channel = %channel, reason = %reason, "Subscription rejected");
                                let _ = notif_tx
                                    .send(TransportNotification::SubscriptionFailed { channel, reason })
                                    .await;
                                continue;
                            }
                            *active.entry(channel.clone()).or_default() += 1;
                            debug!(channel = %channel, "Subscription opened");
                            let _ = notif_tx
                                .send(TransportNotification::SubscriptionSucceeded(channel))
                                .await;
                        }
                        Some(TransportCommand::Unsubscribe(channel)) => {
                            if active.remove(&channel).is_some() {
                                debug!(channel = %channel, "Subscription closed");
                            }
                        }
                        Some(TransportCommand::Shutdown) => {
                            info!("Loopback transport shutdown requested");
                            let _ = notif_tx
                                .send(TransportNotification::StateChanged(ConnectionState::Disconnected))
                                .await;
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down transport");
                            break;
                        }
                    }
                }

                // --- Server side ---
                Some(hub_cmd) = hub_rx.recv() => {
                    match hub_cmd {
                        HubCommand::Publish { channel, event, data } => {
                            if !connected || !active.contains_key(&channel) {
                                debug!(channel = %channel, event = %event, "No subscriber, publish dropped");
                                continue;
                            }
                            let _ = notif_tx
                                .send(TransportNotification::Event { channel, event, data })
                                .await;
                        }
                        HubCommand::Disconnect | HubCommand::Fail(_) if !connected => {}
                        HubCommand::Disconnect => {
                            connected = false;
                            active.clear();
                            info!("Loopback transport disconnected");
                            let _ = notif_tx
                                .send(TransportNotification::StateChanged(ConnectionState::Disconnected))
                                .await;
                        }
                        HubCommand::Fail(reason) => {
                            connected = false;
                            active.clear();
                            warn!(reason = %reason, "Loopback transport error");
                            let _ = notif_tx
                                .send(TransportNotification::StateChanged(ConnectionState::Error))
                                .await;
                        }
                        HubCommand::Reconnect => {
                            if connected {
                                continue;
                            }
                            let _ = notif_tx
                                .send(TransportNotification::StateChanged(ConnectionState::Connecting))
                                .await;
                            connected = true;
                            info!("Loopback transport reconnected");
                            let _ = notif_tx
                                .send(TransportNotification::StateChanged(ConnectionState::Connected))
                                .await;
                        }
                        HubCommand::RejectNextSubscribe { channel, reason } => {
                            rejections.insert(channel, reason);
                        }
                        HubCommand::ActiveSubscriptions { channel, reply } => {
                            let _ = reply.send(active.get(&channel).copied().unwrap_or(0));
                        }
                    }
                }
            }
        }

        info!("Loopback transport terminated");
    });

    (
        TransportHandle::new(cmd_tx),
        notif_rx,
        LoopbackHub { hub_tx },
    )
}

//! Process-wide sink that sees every raw inbound event.
//!
//! Offering an event never blocks and never fails: when the consumer is slow
//! or gone the event is dropped.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use clinic_shared::ChannelName;

/// A transport payload exactly as received, before decoding.
#[derive(Debug, Clone, Serialize)]
pub struct RawEvent {
    pub channel: ChannelName,
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct DebugSink {
    tx: mpsc::Sender<RawEvent>,
}

impl DebugSink {
    pub fn offer(&self, raw: &RawEvent) {
        if self.tx.try_send(raw.clone()).is_err() {
            tracing::trace!(channel = %raw.channel, event = %raw.event, "Debug sink full, event dropped");
        }
    }
}

/// Create a sink with room for `capacity` undrained events.
pub fn debug_sink(capacity: usize) -> (DebugSink, mpsc::Receiver<RawEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DebugSink { tx }, rx)
}

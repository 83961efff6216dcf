//! Replay of recorded push frames through a live session.
//!
//! Frames are published on the loopback hub in order. A marker event on a
//! private control channel follows the last one; once its handler has run,
//! every frame before it has been handled too.

use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use clinic_net::{Handlers, LoopbackHub};
use clinic_shared::{ChannelName, EventKind, PushEvent};

use crate::error::SessionError;
use crate::session::Session;

const CONTROL_CHANNEL: &str = "replay.control";
const FLUSH_EVENT: &str = "replay.flush";

/// One recorded push frame. `channel` defaults to the local user's own.
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub channel: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Publish `frames` and wait until the session has handled all of them.
/// Returns the number of frames published.
pub async fn replay(
    session: &Session,
    hub: &LoopbackHub,
    frames: impl IntoIterator<Item = Frame>,
    timeout: Duration,
) -> Result<usize, SessionError> {
    let (flushed_tx, flushed_rx) = oneshot::channel();
    let flushed_tx = Mutex::new(Some(flushed_tx));
    let control = ChannelName::new(CONTROL_CHANNEL);
    session.subscribe_channel(
        &control,
        Handlers::new().on(EventKind::Unknown, move |event| {
            if matches!(event, PushEvent::Unknown { event } if event == FLUSH_EVENT) {
                if let Some(tx) = flushed_tx.lock().ok().and_then(|mut slot| slot.take()) {
                    let _ = tx.send(());
                }
            }
            Ok(())
        }),
    )?;

    let own = session.local().channel();
    let mut published = 0usize;
    for frame in frames {
        let channel = frame.channel.map(ChannelName::new).unwrap_or_else(|| own.clone());
        hub.publish(&channel, &frame.event, frame.data)?;
        published += 1;
    }
    debug!(published, "Frames published, waiting for marker");

    hub.publish(&control, FLUSH_EVENT, Value::Null)?;
    let drained = tokio::time::timeout(timeout, flushed_rx).await;
    session.unsubscribe_channel(&control)?;
    match drained {
        Ok(Ok(())) => {
            info!(published, "Replay drained");
            Ok(published)
        }
        _ => Err(SessionError::ReplayStalled { published }),
    }
}

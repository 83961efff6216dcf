//! Replay recorded push frames through a live session.
//!
//! Reads newline-delimited JSON frames `{"channel", "event", "data"}` from
//! stdin, publishes them on an in-memory transport and prints the resulting
//! chat list and notification feed. `channel` defaults to the user's own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{trace, warn};

use clinic_client::replay::{replay, Frame};
use clinic_client::{init_tracing, ClientConfig, HttpPortalApi, LogObserver, Session};
use clinic_net::{debug_sink, spawn_loopback};
use clinic_shared::constants::DEBUG_SINK_CAPACITY;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    let local = config.local_user();
    let api = HttpPortalApi::new(&config).context("building HTTP client")?;

    let (transport, notif_rx, hub) = spawn_loopback(config.event_buffer);
    let (sink, mut raw_rx) = debug_sink(DEBUG_SINK_CAPACITY);
    tokio::spawn(async move {
        while let Some(raw) = raw_rx.recv().await {
            trace!(channel = %raw.channel, event = %raw.event, "Raw frame");
        }
    });

    let session = Session::start(
        local,
        transport,
        notif_rx,
        Arc::new(api),
        Arc::new(LogObserver),
        Some(sink),
    )
    .await
    .context("starting session")?;

    let mut frames = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Frame>(line) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!(error = %e, "Skipping malformed frame"),
        }
    }

    replay(&session, &hub, frames, DRAIN_TIMEOUT)
        .await
        .context("replaying frames")?;

    let summary = session.snapshot(|state| {
        json!({
            "chat_list": state.chat_list.entries(),
            "notifications": state.notifications.items(),
            "unread_notifications": state.notifications.unread_count(),
        })
    })?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    session.teardown()?;
    Ok(())
}

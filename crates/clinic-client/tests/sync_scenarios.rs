//! End-to-end session scenarios over the loopback transport and an
//! in-memory portal backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use clinic_client::replay::{replay, Frame};
use clinic_client::{channel_observer, ApiError, PortalApi, Session, SessionError, SessionState, UiEvent};
use clinic_net::{spawn_loopback, Handlers, LoopbackHub, SubscriptionState};
use clinic_shared::{
    ChannelName, ConnectionState, ContactAddress, EventKind, LocalUser, MessageId, NotificationId,
    NotificationPayload, Peer, UserId,
};
use clinic_store::{ChatListEntry, LastMessage, MessageRecord};

const ME: (u64, &str) = (1, "555");
const DOCTOR: (u64, &str) = (2, "777");

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct FakeApi {
    calls: Mutex<Vec<String>>,
    chat_list: Mutex<Vec<ChatListEntry>>,
    history: Mutex<HashMap<ContactAddress, Vec<MessageRecord>>>,
    notifications: Mutex<Vec<NotificationPayload>>,
    next_message_id: AtomicU64,
    fail_fetches: AtomicBool,
    fail_sends: AtomicBool,
    fail_mutations: AtomicBool,
    send_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            chat_list: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            next_message_id: AtomicU64::new(42),
            fail_fetches: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            send_gate: Mutex::new(None),
        }
    }
}

impl FakeApi {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    fn outcome(&self, fail: &AtomicBool) -> Result<(), ApiError> {
        if fail.load(Ordering::SeqCst) {
            Err(ApiError::Unavailable("backend offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PortalApi for FakeApi {
    async fn fetch_chat_list(&self) -> Result<Vec<ChatListEntry>, ApiError> {
        self.record("fetch_chat_list".into());
        self.outcome(&self.fail_fetches)?;
        Ok(self.chat_list.lock().unwrap().clone())
    }

    async fn fetch_conversation(&self, peer: &ContactAddress) -> Result<Vec<MessageRecord>, ApiError> {
        self.record(format!("fetch_conversation:{peer}"));
        self.outcome(&self.fail_fetches)?;
        Ok(self.history.lock().unwrap().get(peer).cloned().unwrap_or_default())
    }

    async fn send_message(&self, receiver: &Peer, body: &str) -> Result<MessageRecord, ApiError> {
        self.record(format!("send_message:{}", receiver.contact));
        let gate = self.send_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.outcome(&self.fail_sends)?;
        Ok(MessageRecord {
            id: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
            sender_id: UserId(ME.0),
            receiver_id: receiver.id,
            message: body.to_string(),
            created_at: Utc::now(),
            is_read: false,
        })
    }

    async fn mark_conversation_read(&self, peer: &ContactAddress) -> Result<(), ApiError> {
        self.record(format!("mark_conversation_read:{peer}"));
        self.outcome(&self.fail_mutations)
    }

    async fn fetch_notifications(&self) -> Result<Vec<NotificationPayload>, ApiError> {
        self.record("fetch_notifications".into());
        self.outcome(&self.fail_fetches)?;
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.record(format!("mark_notification_read:{id}"));
        self.outcome(&self.fail_mutations)
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.record("mark_all_notifications_read".into());
        self.outcome(&self.fail_mutations)
    }

    async fn delete_notification(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.record(format!("delete_notification:{id}"));
        self.outcome(&self.fail_mutations)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    session: Session,
    hub: LoopbackHub,
    api: Arc<FakeApi>,
    events: mpsc::UnboundedReceiver<UiEvent>,
    sentinels: AtomicUsize,
}

fn local() -> LocalUser {
    LocalUser::new(UserId(ME.0), ContactAddress::new(ME.1))
}

fn own_channel() -> ChannelName {
    local().channel()
}

fn doctor() -> Peer {
    Peer::new(UserId(DOCTOR.0), ContactAddress::new(DOCTOR.1)).with_name("Dr. Reyes")
}

async fn start(api: FakeApi) -> Harness {
    let api = Arc::new(api);
    let (observer, events) = channel_observer();
    let (transport, notif_rx, hub) = spawn_loopback(64);
    let session = Session::start(local(), transport, notif_rx, api.clone(), observer, None)
        .await
        .expect("session starts");

    let harness = Harness {
        session,
        hub,
        api,
        events,
        sentinels: AtomicUsize::new(0),
    };
    harness
        .wait_for_subscription(&own_channel(), SubscriptionState::Active)
        .await;
    harness
}

impl Harness {
    async fn eventually(&self, what: &str, check: impl Fn(&SessionState) -> bool) {
        for _ in 0..400 {
            if self.session.snapshot(|state| check(state)).unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn wait_for_subscription(&self, channel: &ChannelName, expected: SubscriptionState) {
        for _ in 0..400 {
            if self.session.subscription_state(channel).unwrap() == Some(expected.clone()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {channel} to become {expected:?}");
    }

    fn push(&self, event: &str, data: Value) {
        self.hub.publish(&own_channel(), event, data).unwrap();
    }

    /// Publish a marker notification and wait for it, so every event
    /// published before it has been handled.
    async fn flush(&self) {
        let n = self.sentinels.fetch_add(1, Ordering::SeqCst);
        let id = NotificationId::new(format!("sentinel-{n}"));
        self.push(
            "notification.created",
            json!({ "id": id.as_str(), "title": "sync", "message": "" }),
        );
        self.eventually("sentinel", |s| s.notifications.get(&id).is_some())
            .await;
    }

    fn drain_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn chat(id: u64, body: &str, from: (u64, &str), to: (u64, &str)) -> Value {
    json!({
        "id": id,
        "message": body,
        "sender_id": from.0,
        "sender_contact_number": from.1,
        "receiver_id": to.0,
        "receiver_contact_number": to.1,
        "created_at": "2024-03-01T10:00:00Z",
    })
}

fn conversation_len(state: &SessionState, peer: u64) -> usize {
    state
        .conversations
        .get(UserId(peer))
        .map_or(0, |c| c.len())
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unread_counts_until_conversation_is_opened() {
    let api = FakeApi::default();
    api.history.lock().unwrap().insert(
        ContactAddress::new(DOCTOR.1),
        vec![MessageRecord {
            id: MessageId(1),
            sender_id: UserId(DOCTOR.0),
            receiver_id: UserId(ME.0),
            message: "hi".into(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            is_read: false,
        }],
    );
    let mut h = start(api).await;

    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.eventually("unread badge", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 1)
        .await;
    assert!(h.drain_events().contains(&UiEvent::MessageReceived {
        peer_id: UserId(DOCTOR.0),
        preview: "hi".into(),
    }));

    let added = h.session.open_conversation(&doctor()).await.unwrap();
    assert_eq!(added, 1);
    assert!(h.api.called("mark_conversation_read:777"));
    let (unread, focused) = h
        .session
        .snapshot(|s| (s.chat_list.unread_count(UserId(DOCTOR.0)), s.focused))
        .unwrap();
    assert_eq!(unread, 0);
    assert_eq!(focused, Some(UserId(DOCTOR.0)));

    // A replayed push for a message already in the history changes nothing.
    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.flush().await;
    let (len, unread) = h
        .session
        .snapshot(|s| (conversation_len(s, DOCTOR.0), s.chat_list.unread_count(UserId(DOCTOR.0))))
        .unwrap();
    assert_eq!(len, 1);
    assert_eq!(unread, 0);
}

#[tokio::test]
async fn test_focused_conversation_receives_without_unread() {
    let h = start(FakeApi::default()).await;
    h.session.open_conversation(&doctor()).await.unwrap();

    h.push("message.sent", chat(5, "are you there?", DOCTOR, ME));
    h.eventually("message in view", |s| conversation_len(s, DOCTOR.0) == 1)
        .await;
    let unread = h
        .session
        .snapshot(|s| s.chat_list.unread_count(UserId(DOCTOR.0)))
        .unwrap();
    assert_eq!(unread, 0);

    assert!(h.session.close_conversation(UserId(DOCTOR.0)).unwrap());
    h.push("message.sent", chat(6, "hello?", DOCTOR, ME));
    h.eventually("unread after close", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 1)
        .await;
    let open = h
        .session
        .snapshot(|s| s.conversations.is_open(UserId(DOCTOR.0)))
        .unwrap();
    assert!(!open);
}

#[tokio::test]
async fn test_optimistic_send_is_confirmed_and_echo_ignored() {
    let mut h = start(FakeApi::default()).await;
    h.session.open_conversation(&doctor()).await.unwrap();

    let correlation_id = h.session.send_message(&doctor(), "ok").await.unwrap();
    let (ids, pending) = h
        .session
        .snapshot(|s| {
            let conversation = s.conversations.get(UserId(DOCTOR.0)).unwrap();
            let ids: Vec<_> = conversation.messages().iter().map(|m| m.id()).collect();
            (ids, conversation.pending_count())
        })
        .unwrap();
    assert_eq!(ids, vec![Some(MessageId(42))]);
    assert_eq!(pending, 0);

    h.push("message.sent", chat(42, "ok", ME, DOCTOR));
    h.flush().await;
    let len = h.session.snapshot(|s| conversation_len(s, DOCTOR.0)).unwrap();
    assert_eq!(len, 1);

    let events = h.drain_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, UiEvent::SendFailed { correlation_id: c, .. } if *c == correlation_id)));
    let preview = h
        .session
        .snapshot(|s| s.chat_list.get(UserId(DOCTOR.0)).map(|e| e.last_message.clone()))
        .unwrap()
        .unwrap();
    assert_eq!(preview.body, "ok");
    assert!(preview.is_mine);
}

#[tokio::test]
async fn test_echo_before_response_is_deduplicated() {
    let api = FakeApi::default();
    let (release, gate) = oneshot::channel();
    *api.send_gate.lock().unwrap() = Some(gate);
    let h = start(api).await;
    h.session.open_conversation(&doctor()).await.unwrap();

    let peer = doctor();
    let hr = &h;
    let (result, ()) = tokio::join!(h.session.send_message(&peer, "ok"), async move {
        hr.eventually("pending message", |s| {
            s.conversations
                .get(UserId(DOCTOR.0))
                .map_or(false, |c| c.pending_count() == 1)
        })
        .await;
        hr.push("message.sent", chat(42, "ok", ME, DOCTOR));
        hr.eventually("echo", |s| {
            s.conversations
                .get(UserId(DOCTOR.0))
                .map_or(false, |c| c.contains(MessageId(42)))
        })
        .await;
        release.send(()).unwrap();
    });
    result.unwrap();

    let (len, pending) = h
        .session
        .snapshot(|s| {
            let c = s.conversations.get(UserId(DOCTOR.0)).unwrap();
            (c.len(), c.pending_count())
        })
        .unwrap();
    assert_eq!(len, 1);
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn test_failed_send_rolls_back_and_reports() {
    let api = FakeApi::default();
    api.fail_sends.store(true, Ordering::SeqCst);
    let mut h = start(api).await;
    h.session.open_conversation(&doctor()).await.unwrap();
    h.drain_events();

    let err = h.session.send_message(&doctor(), "ok").await.unwrap_err();
    let SessionError::SendFailed { correlation_id, .. } = err else {
        panic!("expected SendFailed, got {err:?}");
    };

    let (len, entry) = h
        .session
        .snapshot(|s| (conversation_len(s, DOCTOR.0), s.chat_list.get(UserId(DOCTOR.0)).cloned()))
        .unwrap();
    assert_eq!(len, 0);
    assert_eq!(entry, None);
    let events = h.drain_events();
    assert!(events.contains(&UiEvent::SendFailed {
        peer_id: UserId(DOCTOR.0),
        correlation_id,
        body: "ok".into(),
    }));
    // Once for the optimistic entry, once for its removal.
    let list_changes = events
        .iter()
        .filter(|e| matches!(e, UiEvent::ChatListChanged { .. }))
        .count();
    assert_eq!(list_changes, 2);
}

#[tokio::test]
async fn test_failed_send_restores_chat_list_preview() {
    let api = FakeApi::default();
    api.fail_sends.store(true, Ordering::SeqCst);
    let mut h = start(api).await;

    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.eventually("chat entry", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 1)
        .await;
    h.drain_events();

    h.session.send_message(&doctor(), "ok").await.unwrap_err();
    let entry = h
        .session
        .snapshot(|s| s.chat_list.get(UserId(DOCTOR.0)).cloned())
        .unwrap()
        .unwrap();
    assert_eq!(entry.last_message.body, "hi");
    assert!(!entry.last_message.is_mine);
    assert_eq!(entry.unread_count, 1);
    assert!(h
        .drain_events()
        .contains(&UiEvent::ChatListChanged { total_unread: 1 }));
}

#[tokio::test]
async fn test_send_after_close_is_a_miss() {
    let api = FakeApi::default();
    let (release, gate) = oneshot::channel();
    *api.send_gate.lock().unwrap() = Some(gate);
    let h = start(api).await;
    h.session.open_conversation(&doctor()).await.unwrap();

    let peer = doctor();
    let hr = &h;
    let (result, ()) = tokio::join!(h.session.send_message(&peer, "bye"), async move {
        hr.eventually("pending message", |s| conversation_len(s, DOCTOR.0) == 1)
            .await;
        hr.session.close_conversation(UserId(DOCTOR.0)).unwrap();
        release.send(()).unwrap();
    });

    // The server accepted it; there is just no view left to update.
    assert!(result.is_ok());
    let open = h
        .session
        .snapshot(|s| s.conversations.is_open(UserId(DOCTOR.0)))
        .unwrap();
    assert!(!open);
}

#[tokio::test]
async fn test_partial_payload_resolved_from_chat_list() {
    let api = FakeApi::default();
    api.chat_list.lock().unwrap().push(ChatListEntry {
        peer: doctor(),
        last_message: LastMessage {
            id: Some(MessageId(8)),
            body: "see you".into(),
            created_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
            is_mine: false,
        },
        unread_count: 3,
    });
    let h = start(api).await;
    assert_eq!(h.session.snapshot(|s| s.chat_list.total_unread()).unwrap(), 3);

    h.push(
        "message.sent",
        json!({ "id": 9, "message": "new", "sender_id": DOCTOR.0, "receiver_id": ME.0 }),
    );
    h.eventually("unread bump", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 4)
        .await;

    // The snapshot already counted its own last message.
    h.push("message.sent", chat(8, "see you", DOCTOR, ME));
    h.flush().await;
    assert_eq!(
        h.session.snapshot(|s| s.chat_list.unread_count(UserId(DOCTOR.0))).unwrap(),
        4
    );
}

#[tokio::test]
async fn test_first_message_from_unknown_peer_by_id_only() {
    const NURSE: (u64, &str) = (9, "999");
    let mut h = start(FakeApi::default()).await;

    h.push(
        "message.sent",
        json!({ "id": 50, "message": "results are in", "sender_id": NURSE.0, "receiver_id": ME.0 }),
    );
    h.eventually("new chat entry", |s| s.chat_list.unread_count(UserId(NURSE.0)) == 1)
        .await;
    let (len, placeholder) = h
        .session
        .snapshot(|s| {
            (
                s.chat_list.len(),
                s.chat_list.peer(UserId(NURSE.0)).map(|p| p.is_placeholder()),
            )
        })
        .unwrap();
    assert_eq!(len, 1);
    assert_eq!(placeholder, Some(true));
    assert!(h.drain_events().contains(&UiEvent::MessageReceived {
        peer_id: UserId(NURSE.0),
        preview: "results are in".into(),
    }));

    // A fuller payload fills in the address on both the directory and the entry.
    h.push("message.sent", chat(51, "call me", NURSE, ME));
    h.eventually("second message", |s| s.chat_list.unread_count(UserId(NURSE.0)) == 2)
        .await;
    let (contact, known) = h
        .session
        .snapshot(|s| {
            (
                s.chat_list.peer(UserId(NURSE.0)).map(|p| p.contact.clone()),
                s.peers.by_contact(&ContactAddress::new(NURSE.1)).map(|p| p.id),
            )
        })
        .unwrap();
    assert_eq!(contact, Some(ContactAddress::new(NURSE.1)));
    assert_eq!(known, Some(UserId(NURSE.0)));
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_subscribe_keeps_one_transport_subscription() {
    let h = start(FakeApi::default()).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    let subscription = h
        .session
        .subscribe_channel(
            &own_channel(),
            Handlers::new().on(EventKind::MessageSent, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    assert!(subscription.merged());
    assert_eq!(h.hub.active_subscriptions(&own_channel()).await.unwrap(), 1);

    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.flush().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let unread = h
        .session
        .snapshot(|s| s.chat_list.unread_count(UserId(DOCTOR.0)))
        .unwrap();
    assert_eq!(unread, 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let h = start(FakeApi::default()).await;
    let broadcast = ChannelName::new("clinic.broadcast");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    h.session
        .subscribe_channel(
            &broadcast,
            Handlers::new().on(EventKind::NotificationCreated, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    h.wait_for_subscription(&broadcast, SubscriptionState::Active)
        .await;

    h.hub
        .publish(&broadcast, "notification.created", json!({ "id": "b1", "message": "x" }))
        .unwrap();
    h.flush().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    h.session.unsubscribe_channel(&broadcast).unwrap();
    h.hub
        .publish(&broadcast, "notification.created", json!({ "id": "b2", "message": "x" }))
        .unwrap();
    h.flush().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.subscription_state(&broadcast).unwrap(), None);
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let h = start(FakeApi::default()).await;
    let mut connection = h.session.connection_state().unwrap();

    h.hub.disconnect().unwrap();
    h.wait_for_subscription(&own_channel(), SubscriptionState::Pending)
        .await;
    assert_eq!(*connection.borrow_and_update(), ConnectionState::Disconnected);

    h.hub.reconnect().unwrap();
    h.wait_for_subscription(&own_channel(), SubscriptionState::Active)
        .await;
    assert!(connection.borrow_and_update().is_connected());
    assert_eq!(h.hub.active_subscriptions(&own_channel()).await.unwrap(), 1);

    h.push("message.sent", chat(3, "back online", DOCTOR, ME));
    h.eventually("delivery after reconnect", |s| {
        s.chat_list.unread_count(UserId(DOCTOR.0)) == 1
    })
    .await;
}

#[tokio::test]
async fn test_panicking_handler_does_not_block_others() {
    let h = start(FakeApi::default()).await;
    h.session
        .subscribe_channel(
            &own_channel(),
            Handlers::new().on(EventKind::MessageSent, |_| panic!("handler bug")),
        )
        .unwrap();

    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.eventually("chat list update", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 1)
        .await;

    // The bridge survives and keeps delivering.
    h.push("message.sent", chat(2, "still there", DOCTOR, ME));
    h.eventually("second delivery", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 2)
        .await;
}

#[tokio::test]
async fn test_teardown_releases_everything() {
    let h = start(FakeApi::default()).await;
    let connection = h.session.connection_state().unwrap();

    h.session.teardown().unwrap();
    assert_eq!(*connection.borrow(), ConnectionState::Disconnected);
    assert_eq!(h.session.subscription_state(&own_channel()).unwrap(), None);
    assert!(matches!(
        h.session.subscribe_channel(&own_channel(), Handlers::new()),
        Err(SessionError::Net(_))
    ));
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bootstrap_loads_notifications() {
    let api = FakeApi::default();
    api.notifications.lock().unwrap().extend([
        NotificationPayload {
            id: Some(NotificationId::new("1")),
            title: Some("Lab results".into()),
            message: "Ready".into(),
            kind: Some("success".into()),
            related_type: None,
            related_id: None,
            is_read: false,
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        },
        NotificationPayload {
            id: Some(NotificationId::new("2")),
            title: Some("Welcome".into()),
            message: String::new(),
            kind: None,
            related_type: None,
            related_id: None,
            is_read: true,
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()),
        },
    ]);
    let h = start(api).await;

    let (len, unread) = h
        .session
        .snapshot(|s| (s.notifications.len(), s.notifications.unread_count()))
        .unwrap();
    assert_eq!(len, 2);
    assert_eq!(unread, 1);
}

#[tokio::test]
async fn test_failed_bootstrap_still_starts() {
    let api = FakeApi::default();
    api.fail_fetches.store(true, Ordering::SeqCst);
    let mut h = start(api).await;

    let failures = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, UiEvent::SyncFailed { .. }))
        .count();
    assert_eq!(failures, 2);

    h.push("message.sent", chat(1, "hi", DOCTOR, ME));
    h.eventually("live delivery", |s| s.chat_list.unread_count(UserId(DOCTOR.0)) == 1)
        .await;
}

#[tokio::test]
async fn test_pushed_notifications_dedupe_and_count() {
    let h = start(FakeApi::default()).await;

    h.push("notification.created", json!({ "notification": { "id": 5, "title": "Reminder", "message": "Tomorrow" } }));
    h.push("notification.created", json!({ "id": 5, "title": "Reminder", "message": "Tomorrow" }));
    h.push(
        "appointment.created",
        json!({ "id": 77, "message": "Booked", "notification_id": 6 }),
    );
    h.flush().await;

    let (ids, unread, consistent) = h
        .session
        .snapshot(|s| {
            let ids: Vec<String> = s
                .notifications
                .items()
                .iter()
                .map(|n| n.id.as_str().to_string())
                .filter(|id| !id.starts_with("sentinel"))
                .collect();
            (ids, s.notifications.unread_count(), s.notifications.is_consistent())
        })
        .unwrap();
    assert_eq!(ids, vec!["6", "5"]);
    // Two pushes plus the flush marker.
    assert_eq!(unread, 3);
    assert!(consistent);

    assert!(h.session.mark_notification_read(&NotificationId::new("5")).await.unwrap());
    assert!(!h.session.mark_notification_read(&NotificationId::new("5")).await.unwrap());
    assert!(h.session.delete_notification(&NotificationId::new("6")).await.unwrap());
    assert!(h.api.called("mark_notification_read:5"));
    assert!(h.api.called("delete_notification:6"));

    // A deleted notification does not come back from a late duplicate.
    h.push("appointment.created", json!({ "id": 77, "message": "Booked", "notification_id": 6 }));
    h.flush().await;
    let (has_deleted, unread) = h
        .session
        .snapshot(|s| {
            (
                s.notifications.get(&NotificationId::new("6")).is_some(),
                s.notifications.unread_count(),
            )
        })
        .unwrap();
    assert!(!has_deleted);
    assert_eq!(unread, 2);

    assert_eq!(h.session.mark_all_notifications_read().await.unwrap(), 2);
    assert_eq!(h.session.snapshot(|s| s.notifications.unread_count()).unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_appointment_event_is_not_duplicated() {
    let h = start(FakeApi::default()).await;

    h.push("appointment.reminder", json!({ "id": 12, "message": "Tomorrow at 10:00" }));
    h.push("appointment.reminder", json!({ "id": 12, "message": "Tomorrow at 10:00" }));
    h.push("appointment.updated", json!({ "id": 12, "message": "Moved to 11:00" }));
    h.flush().await;

    let (titles, unread) = h
        .session
        .snapshot(|s| {
            let titles: Vec<String> = s
                .notifications
                .items()
                .iter()
                .filter(|n| n.related_id == Some(NotificationId::new("12")))
                .map(|n| n.title.clone())
                .collect();
            (titles, s.notifications.unread_count())
        })
        .unwrap();
    assert_eq!(titles.len(), 2);
    // Two appointment entries plus the flush marker.
    assert_eq!(unread, 3);

    let id = h
        .session
        .snapshot(|s| {
            s.notifications
                .items()
                .iter()
                .find(|n| n.related_id == Some(NotificationId::new("12")))
                .map(|n| n.id.clone())
        })
        .unwrap()
        .unwrap();
    assert!(id.is_local());
    assert!(h.session.mark_notification_read(&id).await.unwrap());
    assert!(!h.api.called(&format!("mark_notification_read:{id}")));
}

#[tokio::test]
async fn test_failed_mutation_keeps_local_change() {
    let api = FakeApi::default();
    api.fail_mutations.store(true, Ordering::SeqCst);
    let mut h = start(api).await;

    h.push("notification.created", json!({ "id": "n1", "message": "hello" }));
    h.eventually("notification", |s| s.notifications.len() == 1).await;
    h.drain_events();

    let err = h
        .session
        .mark_notification_read(&NotificationId::new("n1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::MutationSync {
            action: "mark_notification_read",
            ..
        }
    ));
    let read = h
        .session
        .snapshot(|s| s.notifications.get(&NotificationId::new("n1")).map(|n| n.is_read))
        .unwrap();
    assert_eq!(read, Some(true));
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, UiEvent::SyncFailed { action, .. } if action == "mark_notification_read")));
}

#[tokio::test]
async fn test_local_only_notification_skips_backend() {
    let h = start(FakeApi::default()).await;

    h.push("notification.created", json!({ "title": "No id", "message": "x" }));
    h.eventually("notification", |s| s.notifications.len() == 1).await;
    let id = h
        .session
        .snapshot(|s| s.notifications.items()[0].id.clone())
        .unwrap();
    assert!(id.is_local());

    assert!(h.session.delete_notification(&id).await.unwrap());
    assert!(!h
        .api
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.starts_with("delete_notification")));
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_replay_returns_after_every_frame_is_handled() {
    let h = start(FakeApi::default()).await;

    let mut frames: Vec<Frame> = (1..=200)
        .map(|id| Frame {
            channel: None,
            event: "message.sent".into(),
            data: chat(id, "hi", DOCTOR, ME),
        })
        .collect();
    frames.push(Frame {
        channel: Some(own_channel().as_str().to_string()),
        event: "notification.created".into(),
        data: json!({ "id": "last", "message": "done" }),
    });

    let published = replay(&h.session, &h.hub, frames, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(published, 201);

    // No waiting: the snapshot already reflects every frame.
    let (unread, has_last) = h
        .session
        .snapshot(|s| {
            (
                s.chat_list.unread_count(UserId(DOCTOR.0)),
                s.notifications.get(&NotificationId::new("last")).is_some(),
            )
        })
        .unwrap();
    assert_eq!(unread, 200);
    assert!(has_last);
    assert_eq!(
        h.session
            .subscription_state(&ChannelName::new("replay.control"))
            .unwrap(),
        None
    );
}

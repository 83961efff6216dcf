//! Conversation views and optimistic sends.

use chrono::Utc;
use tracing::{debug, info, warn};

use clinic_shared::{CorrelationId, Peer, UserId};
use clinic_store::{ChatActivity, Reconciliation};

use crate::error::SessionError;
use crate::events::UiEvent;
use crate::session::{lock, Session};

impl Session {
    /// Open the conversation view with `peer`, focus it and load its history.
    ///
    /// The peer's unread counter is cleared before the server is told; if
    /// the mark-read call fails the local reset stands. Returns the number
    /// of history messages merged in.
    pub async fn open_conversation(&self, peer: &Peer) -> Result<usize, SessionError> {
        let (cleared, total_unread) = {
            let mut state = lock(&self.state)?;
            state.peers.remember(peer);
            state.conversations.open(peer);
            state.focused = Some(peer.id);
            let cleared = state.chat_list.reset_unread(peer.id).unwrap_or(0);
            (cleared, state.chat_list.total_unread())
        };
        if cleared > 0 {
            self.emit(UiEvent::ChatListChanged { total_unread });
        }

        let loaded = self.load_conversation(peer).await;
        let marked = self.sync_conversation_read(peer).await;
        let added = loaded?;
        marked?;
        Ok(added)
    }

    /// Close the view with `peer_id`. Pending sends for it become misses.
    pub fn close_conversation(&self, peer_id: UserId) -> Result<bool, SessionError> {
        let mut state = lock(&self.state)?;
        if state.focused == Some(peer_id) {
            state.focused = None;
        }
        Ok(state.conversations.close(peer_id))
    }

    /// Refetch the history of an open conversation and merge it. A
    /// placeholder peer has no address to fetch by and loads nothing.
    pub async fn load_conversation(&self, peer: &Peer) -> Result<usize, SessionError> {
        if peer.is_placeholder() {
            debug!(peer = %peer.id, "No contact address yet, history not fetched");
            return Ok(0);
        }
        let records = match self.api.fetch_conversation(&peer.contact).await {
            Ok(records) => records,
            Err(source) => {
                self.report_sync_failure("fetch_conversation", &source);
                return Err(SessionError::Fetch {
                    what: "conversation",
                    source,
                });
            }
        };

        let added = {
            let mut state = lock(&self.state)?;
            let local = state.local.id;
            let history = records.into_iter().map(|r| r.into_message(local)).collect();
            state.conversations.load_history(peer.id, history)
        };

        match added {
            Some(added) => {
                if added > 0 {
                    self.emit(UiEvent::ConversationChanged { peer_id: peer.id });
                }
                Ok(added)
            }
            None => {
                debug!(peer = %peer.id, "Conversation closed before history arrived");
                Ok(0)
            }
        }
    }

    async fn sync_conversation_read(&self, peer: &Peer) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.state)?;
            if let Some(conversation) = state.conversations.get_mut(peer.id) {
                conversation.mark_inbound_read();
            }
        }
        if peer.is_placeholder() {
            return Ok(());
        }

        self.api
            .mark_conversation_read(&peer.contact)
            .await
            .map_err(|source| {
                self.report_sync_failure("mark_conversation_read", &source);
                SessionError::MutationSync {
                    action: "mark_conversation_read",
                    source,
                }
            })
    }

    /// Send `body` to `peer`.
    ///
    /// The message appears immediately as pending. On success it is replaced
    /// in place by the server's copy; on failure it is removed, the chat list
    /// preview goes back to what it was and a [`UiEvent::SendFailed`] is
    /// raised so the UI can offer a retry.
    pub async fn send_message(
        &self,
        peer: &Peer,
        body: &str,
    ) -> Result<CorrelationId, SessionError> {
        let now = Utc::now();
        let (correlation_id, prior, total_unread) = {
            let mut state = lock(&self.state)?;
            state.peers.remember(peer);
            let correlation_id = state.conversations.send_optimistic(peer, body, now);
            let prior = state.chat_list.get(peer.id).map(|e| e.last_message.clone());

            let activity = ChatActivity {
                message_id: None,
                sender_id: state.local.id,
                receiver_id: peer.id,
                body: body.to_string(),
                created_at: now,
            };
            let focused = state.focused;
            state.chat_list.on_event(&activity, peer, focused);
            (correlation_id, prior, state.chat_list.total_unread())
        };
        self.emit_all(vec![
            UiEvent::ConversationChanged { peer_id: peer.id },
            UiEvent::ChatListChanged { total_unread },
        ]);

        match self.api.send_message(peer, body).await {
            Ok(record) => {
                let outcome = {
                    let mut state = lock(&self.state)?;
                    let local = state.local.id;
                    state
                        .conversations
                        .resolve_sent(correlation_id, record.into_message(local))
                };
                debug!(correlation = %correlation_id, ?outcome, "Send confirmed");
                if outcome != Reconciliation::Miss {
                    self.emit(UiEvent::ConversationChanged { peer_id: peer.id });
                }
                info!(peer = %peer.id, "Message sent");
                Ok(correlation_id)
            }
            Err(source) => {
                let (outcome, restored, total_unread) = {
                    let mut state = lock(&self.state)?;
                    let outcome = state.conversations.resolve_failed(correlation_id);
                    let restored = state.chat_list.restore(peer.id, prior);
                    (outcome, restored, state.chat_list.total_unread())
                };
                warn!(
                    peer = %peer.id,
                    correlation = %correlation_id,
                    error = %source,
                    "Send failed, optimistic message rolled back"
                );

                let mut events = Vec::with_capacity(3);
                if matches!(outcome, Reconciliation::RolledBack(_)) {
                    events.push(UiEvent::ConversationChanged { peer_id: peer.id });
                }
                if restored {
                    events.push(UiEvent::ChatListChanged { total_unread });
                }
                events.push(UiEvent::SendFailed {
                    peer_id: peer.id,
                    correlation_id,
                    body: body.to_string(),
                });
                self.emit_all(events);

                Err(SessionError::SendFailed {
                    correlation_id,
                    source,
                })
            }
        }
    }
}

//! Open conversations and optimistic-send reconciliation.
//!
//! A conversation exists only while its view is open. Messages are kept in
//! arrival order; pending messages are addressed by correlation id and
//! confirmed ones by server id, and no server id ever appears twice.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use clinic_shared::{CorrelationId, MessageId, Peer, UserId};

use crate::models::{DeliveryState, Message, MessageKey};

/// Result of settling an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The pending entry at `position` now holds the confirmed message.
    Confirmed { position: usize },
    /// The confirmed id had already arrived by push; the pending entry was
    /// dropped instead of duplicating it.
    Deduplicated,
    /// The pending entry was removed after a failed send.
    RolledBack(Message),
    /// Nothing to settle: already resolved or the conversation was closed.
    Miss,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    peer: Peer,
    messages: Vec<Message>,
    #[serde(skip)]
    confirmed_ids: HashSet<MessageId>,
}

impl Conversation {
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            confirmed_ids: HashSet::new(),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.confirmed_ids.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.delivery_state == DeliveryState::Pending)
            .count()
    }

    fn position_of(&self, correlation_id: CorrelationId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.key == MessageKey::Pending(correlation_id))
    }

    fn push_pending(
        &mut self,
        local: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> CorrelationId {
        let correlation_id = CorrelationId::new();
        self.messages.push(Message {
            key: MessageKey::Pending(correlation_id),
            sender_id: local,
            receiver_id: self.peer.id,
            body: body.to_string(),
            created_at,
            is_mine: true,
            is_read: false,
            delivery_state: DeliveryState::Pending,
        });
        correlation_id
    }

    /// The only transition out of `Pending`. `Some(confirmed)` settles a
    /// successful send, `None` a failed one.
    pub fn reconcile(
        &mut self,
        correlation_id: CorrelationId,
        confirmed: Option<Message>,
    ) -> Reconciliation {
        let Some(position) = self.position_of(correlation_id) else {
            return Reconciliation::Miss;
        };

        match confirmed {
            Some(mut confirmed) => {
                let Some(id) = confirmed.id() else {
                    // A pending message cannot confirm another one.
                    return Reconciliation::Miss;
                };
                if self.confirmed_ids.contains(&id) {
                    self.messages.remove(position);
                    return Reconciliation::Deduplicated;
                }
                confirmed.delivery_state = DeliveryState::Confirmed;
                self.confirmed_ids.insert(id);
                self.messages[position] = confirmed;
                Reconciliation::Confirmed { position }
            }
            None => {
                let mut removed = self.messages.remove(position);
                removed.delivery_state = DeliveryState::Failed;
                Reconciliation::RolledBack(removed)
            }
        }
    }

    /// Append a confirmed message at the tail unless its id is already
    /// present. Returns whether it was appended.
    pub fn apply_inbound(&mut self, message: Message) -> bool {
        let Some(id) = message.id() else {
            return false;
        };
        if !self.confirmed_ids.insert(id) {
            debug!(peer = %self.peer.id, msg_id = %id, "Duplicate message suppressed");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Merge a history page into the conversation.
    ///
    /// History comes first in timestamp order; anything that arrived while
    /// the request was in flight (pushes and pending sends) keeps its
    /// relative order after it. Returns the number of history messages added.
    pub fn merge_history(&mut self, mut history: Vec<Message>) -> usize {
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut merged = Vec::with_capacity(history.len() + self.messages.len());
        let mut seen = HashSet::new();
        for message in history {
            if let Some(id) = message.id() {
                if seen.insert(id) {
                    merged.push(message);
                }
            }
        }
        let added = merged
            .iter()
            .filter_map(Message::id)
            .filter(|id| !self.confirmed_ids.contains(id))
            .count();

        for message in self.messages.drain(..) {
            match message.id() {
                Some(id) if !seen.insert(id) => {}
                _ => merged.push(message),
            }
        }

        self.confirmed_ids = seen;
        self.messages = merged;
        added
    }

    /// Mark every inbound message as read.
    pub fn mark_inbound_read(&mut self) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut().filter(|m| !m.is_mine && !m.is_read) {
            message.is_read = true;
            changed += 1;
        }
        changed
    }
}

/// Every conversation whose view is currently open, keyed by peer id.
#[derive(Debug)]
pub struct ConversationStore {
    local: UserId,
    open: HashMap<UserId, Conversation>,
    pending: HashMap<CorrelationId, UserId>,
}

impl ConversationStore {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            open: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn local(&self) -> UserId {
        self.local
    }

    /// Open the conversation with `peer`. Opening twice keeps the existing one.
    pub fn open(&mut self, peer: &Peer) -> &mut Conversation {
        self.open.entry(peer.id).or_insert_with(|| {
            info!(peer = %peer.id, "Conversation opened");
            Conversation::new(peer.clone())
        })
    }

    /// Close the conversation; any of its unresolved sends become misses.
    pub fn close(&mut self, peer_id: UserId) -> bool {
        if self.open.remove(&peer_id).is_none() {
            return false;
        }
        self.pending.retain(|_, peer| *peer != peer_id);
        info!(peer = %peer_id, "Conversation closed");
        true
    }

    pub fn is_open(&self, peer_id: UserId) -> bool {
        self.open.contains_key(&peer_id)
    }

    pub fn get(&self, peer_id: UserId) -> Option<&Conversation> {
        self.open.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: UserId) -> Option<&mut Conversation> {
        self.open.get_mut(&peer_id)
    }

    pub fn open_peers(&self) -> impl Iterator<Item = &Peer> {
        self.open.values().map(Conversation::peer)
    }

    /// Merge `history` into the open conversation with `peer_id`. A miss when
    /// the view was closed before the history arrived.
    pub fn load_history(&mut self, peer_id: UserId, history: Vec<Message>) -> Option<usize> {
        let conversation = self.open.get_mut(&peer_id)?;
        let added = conversation.merge_history(history);
        debug!(peer = %peer_id, added, total = conversation.len(), "History merged");
        Some(added)
    }

    /// Append a pending message from the local user and return its
    /// correlation id. Opens the conversation if needed.
    pub fn send_optimistic(
        &mut self,
        peer: &Peer,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> CorrelationId {
        let local = self.local;
        let correlation_id = self.open(peer).push_pending(local, body, created_at);
        self.pending.insert(correlation_id, peer.id);
        debug!(peer = %peer.id, correlation = %correlation_id, "Optimistic message appended");
        correlation_id
    }

    pub fn resolve_sent(
        &mut self,
        correlation_id: CorrelationId,
        confirmed: Message,
    ) -> Reconciliation {
        self.settle(correlation_id, Some(confirmed))
    }

    pub fn resolve_failed(&mut self, correlation_id: CorrelationId) -> Reconciliation {
        self.settle(correlation_id, None)
    }

    fn settle(
        &mut self,
        correlation_id: CorrelationId,
        confirmed: Option<Message>,
    ) -> Reconciliation {
        // Leave the send pending so the real confirmation can still land.
        if confirmed.as_ref().is_some_and(|m| m.id().is_none()) {
            debug!(correlation = %correlation_id, "Confirmation without server id ignored");
            return Reconciliation::Miss;
        }
        let Some(peer_id) = self.pending.remove(&correlation_id) else {
            debug!(correlation = %correlation_id, "Reconciliation miss");
            return Reconciliation::Miss;
        };
        match self.open.get_mut(&peer_id) {
            Some(conversation) => conversation.reconcile(correlation_id, confirmed),
            None => Reconciliation::Miss,
        }
    }

    /// Apply a confirmed message from the push stream. Only lands if the
    /// conversation with its counterpart is open.
    pub fn apply_inbound(&mut self, message: Message) -> bool {
        let peer_id = message.counterpart(self.local);
        match self.open.get_mut(&peer_id) {
            Some(conversation) => conversation.apply_inbound(message),
            None => false,
        }
    }
}

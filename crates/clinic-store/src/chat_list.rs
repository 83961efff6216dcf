//! Recency-ordered chat list with per-peer unread counters.
//!
//! Fed by every chat event regardless of which conversation views are open.
//! Entries are kept sorted by last message time, newest first; the sort is
//! stable so ties keep their previous relative order.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use clinic_shared::{MessageId, Peer, UserId};

use crate::models::{ChatListEntry, LastMessage};

/// One chat message as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatActivity {
    /// Server id when known; optimistic sends have none yet.
    pub message_id: Option<MessageId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ChatList {
    local: UserId,
    entries: Vec<ChatListEntry>,
    counted: HashSet<MessageId>,
}

impl ChatList {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            entries: Vec::new(),
            counted: HashSet::new(),
        }
    }

    pub fn entries(&self) -> &[ChatListEntry] {
        &self.entries
    }

    pub fn get(&self, peer_id: UserId) -> Option<&ChatListEntry> {
        self.entries.iter().find(|e| e.peer.id == peer_id)
    }

    pub fn unread_count(&self, peer_id: UserId) -> u32 {
        self.get(peer_id).map_or(0, |e| e.unread_count)
    }

    pub fn total_unread(&self) -> u32 {
        self.entries.iter().map(|e| e.unread_count).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the list with a fetched snapshot.
    ///
    /// The snapshot's counters already include every message up to each
    /// entry's last one, so those ids are marked as counted. A push for an
    /// older message that lands after the fetch but was already part of the
    /// server's count is not detectable and will still be counted.
    pub fn replace_all(&mut self, entries: Vec<ChatListEntry>) {
        self.counted = entries.iter().filter_map(|e| e.last_message.id).collect();
        self.entries = entries;
        self.sort();
    }

    /// Record `activity` with `peer`, the participant that is not the local
    /// user.
    ///
    /// The unread counter grows only for inbound messages while `focused` is
    /// some other peer (or nothing). A server id that was already counted is
    /// ignored entirely. Returns `false` for such duplicates.
    pub fn on_event(&mut self, activity: &ChatActivity, peer: &Peer, focused: Option<UserId>) -> bool {
        let inbound = activity.sender_id != self.local;

        if let Some(id) = activity.message_id {
            if !self.counted.insert(id) {
                debug!(peer = %peer.id, msg_id = %id, "Chat list already saw message");
                return false;
            }
        }

        let last_message = LastMessage {
            id: activity.message_id,
            body: activity.body.clone(),
            created_at: activity.created_at,
            is_mine: !inbound,
        };
        let bump = u32::from(inbound && focused != Some(peer.id));

        match self.entries.iter_mut().find(|e| e.peer.id == peer.id) {
            Some(entry) => {
                entry.peer.fill_from(peer);
                // A late event must not roll the preview back in time.
                if entry.last_message.created_at <= activity.created_at {
                    entry.last_message = last_message;
                }
                entry.unread_count += bump;
            }
            None => self.entries.push(ChatListEntry {
                peer: peer.clone(),
                last_message,
                unread_count: bump,
            }),
        }

        self.sort();
        true
    }

    /// Undo an optimistic outbound entry for `peer_id`. `prior` is the entry
    /// as it was before the send; with none the entry is dropped. The unread
    /// counter keeps its current value since inbound messages may have
    /// arrived in the meantime.
    pub fn restore(&mut self, peer_id: UserId, prior: Option<LastMessage>) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.peer.id == peer_id) else {
            return false;
        };
        let entry = &mut self.entries[pos];
        // A newer message may have replaced the optimistic preview.
        if !entry.last_message.is_mine || entry.last_message.id.is_some() {
            return false;
        }
        match prior {
            Some(last_message) => entry.last_message = last_message,
            None if entry.unread_count == 0 => {
                self.entries.remove(pos);
            }
            None => return false,
        }
        self.sort();
        true
    }

    /// Zero the unread counter of `peer_id`, returning the previous value.
    pub fn reset_unread(&mut self, peer_id: UserId) -> Option<u32> {
        let entry = self.entries.iter_mut().find(|e| e.peer.id == peer_id)?;
        Some(std::mem::take(&mut entry.unread_count))
    }

    /// Known peer with this id, if it has an entry.
    pub fn peer(&self, peer_id: UserId) -> Option<&Peer> {
        self.get(peer_id).map(|e| &e.peer)
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
    }
}

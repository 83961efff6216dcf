//! Peer directory.
//!
//! Maps internal user ids and contact addresses to the [`Peer`] they belong
//! to. Push payloads may identify a participant by id, by contact address or
//! by both; the directory fills in whichever half is missing from peers
//! seen earlier (chat list, opened conversations, fuller payloads). A user
//! first seen by id alone is held as a placeholder until its contact
//! address turns up.

use std::collections::HashMap;

use tracing::debug;

use clinic_shared::{ContactAddress, Participant, Peer, UserId};

#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: HashMap<UserId, Peer>,
    by_contact: HashMap<ContactAddress, UserId>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer. A peer's identity never changes once known; only a
    /// missing contact address or display name is filled in later.
    pub fn remember(&mut self, peer: &Peer) {
        match self.peers.get_mut(&peer.id) {
            Some(known) => {
                let was_placeholder = known.is_placeholder();
                if known.fill_from(peer) && was_placeholder && !known.is_placeholder() {
                    debug!(peer = %known.id, contact = %known.contact, "Placeholder peer completed");
                    self.by_contact.insert(known.contact.clone(), known.id);
                }
            }
            None => {
                debug!(peer = %peer.id, contact = %peer.contact, "Peer added to directory");
                if !peer.is_placeholder() {
                    self.by_contact.insert(peer.contact.clone(), peer.id);
                }
                self.peers.insert(peer.id, peer.clone());
            }
        }
    }

    pub fn get(&self, id: UserId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn by_contact(&self, contact: &ContactAddress) -> Option<&Peer> {
        self.by_contact
            .get(contact)
            .and_then(|id| self.peers.get(id))
    }

    /// Resolve a payload participant to a peer, learning it when the payload
    /// carries an id. An unknown id without a contact address yields a
    /// placeholder; an unknown contact address without an id yields `None`.
    pub fn resolve(&mut self, participant: &Participant) -> Option<Peer> {
        let peer = match (&participant.id, &participant.contact) {
            (Some(id), Some(contact)) => {
                let seen = Peer::new(*id, contact.clone());
                match self.get(*id) {
                    Some(known) => {
                        let mut known = known.clone();
                        known.fill_from(&seen);
                        known
                    }
                    None => seen,
                }
            }
            (Some(id), None) => self
                .get(*id)
                .cloned()
                .unwrap_or_else(|| Peer::placeholder(*id)),
            (None, Some(contact)) => self.by_contact(contact)?.clone(),
            (None, None) => return None,
        };

        let peer = match (&peer.name, &participant.name) {
            (None, Some(name)) => peer.with_name(name.clone()),
            _ => peer,
        };
        self.remember(&peer);
        self.get(peer.id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

//! Session state shared between the push bridge and user commands.
//!
//! The [`SessionState`] struct is wrapped in `Arc<Mutex<>>`. The lock is
//! never held across an await, so pushes and outbound calls interleave
//! freely between network round-trips.

use clinic_shared::{LocalUser, UserId};
use clinic_store::{ChatList, ConversationStore, NotificationCenter, PeerDirectory};

pub struct SessionState {
    /// The signed-in user.
    pub local: LocalUser,

    /// Open conversation views and their pending sends.
    pub conversations: ConversationStore,

    /// Recency-ordered chat list with per-peer unread counters.
    pub chat_list: ChatList,

    /// Notification feed.
    pub notifications: NotificationCenter,

    /// Peers seen so far, for resolving partial push payloads.
    pub peers: PeerDirectory,

    /// The conversation currently on screen. Inbound messages from this
    /// peer do not raise its unread counter.
    pub focused: Option<UserId>,
}

impl SessionState {
    pub fn new(local: LocalUser) -> Self {
        Self {
            conversations: ConversationStore::new(local.id),
            chat_list: ChatList::new(local.id),
            notifications: NotificationCenter::new(),
            peers: PeerDirectory::new(),
            focused: None,
            local,
        }
    }
}

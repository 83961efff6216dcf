//! # clinic-store
//!
//! In-memory projections of the portal's push stream: open conversations
//! with optimistic-send reconciliation, the recency-ordered chat list and
//! the notification center. Nothing here touches the network; callers feed
//! decoded events and REST results in and read the resulting state back.

pub mod chat_list;
pub mod conversation;
pub mod models;
pub mod notifications;
pub mod peers;

pub use chat_list::{ChatActivity, ChatList};
pub use conversation::{Conversation, ConversationStore, Reconciliation};
pub use models::*;
pub use notifications::{classify, NotificationCenter};
pub use peers::PeerDirectory;

//! Notification feed with an incrementally maintained unread counter.
//!
//! Per notification: `unread -> read` on mark-read, and either state to
//! `removed` on delete. Removed ids are remembered for the session so a late
//! duplicate push cannot bring one back; only a full refetch resets that.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use clinic_shared::constants::{RELATED_APPOINTMENT, RELATED_CHAT};
use clinic_shared::{NotificationId, NotificationPayload};

use crate::models::{Notification, NotificationType};

/// Pick the display type of a notification.
///
/// Precedence: chat-related, then appointment-related, then an explicit
/// `type` field, then `info`.
pub fn classify(payload: &NotificationPayload) -> NotificationType {
    match payload.related_type.as_deref() {
        Some(RELATED_CHAT) => NotificationType::Message,
        Some(RELATED_APPOINTMENT) => NotificationType::Appointment,
        _ => payload
            .kind
            .as_deref()
            .and_then(NotificationType::parse)
            .unwrap_or(NotificationType::Info),
    }
}

fn build(payload: NotificationPayload, id: NotificationId, now: DateTime<Utc>) -> Notification {
    let kind = classify(&payload);
    Notification {
        id,
        title: payload.title.unwrap_or_default(),
        message: payload.message,
        kind,
        related_type: payload.related_type,
        related_id: payload.related_id,
        is_read: payload.is_read,
        created_at: payload.created_at.unwrap_or(now),
    }
}

#[derive(Debug, Default)]
pub struct NotificationCenter {
    /// Most recent first.
    items: Vec<Notification>,
    unread: usize,
    ids: HashSet<NotificationId>,
    removed: HashSet<NotificationId>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| &n.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count unread entries from scratch.
    pub fn recount(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.recount() == self.unread
    }

    /// Replace the feed with a fetched snapshot, newest first.
    pub fn load(&mut self, fetched: Vec<NotificationPayload>, now: DateTime<Utc>) {
        self.items.clear();
        self.ids.clear();
        self.removed.clear();

        for payload in fetched {
            let id = payload.id.clone().unwrap_or_else(NotificationId::local);
            if !self.ids.insert(id.clone()) {
                continue;
            }
            self.items.push(build(payload, id, now));
        }
        // Stable: equal timestamps keep server order.
        self.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.unread = self.recount();
        debug!(count = self.items.len(), unread = self.unread, "Notifications loaded");
    }

    /// Insert a pushed notification at the front, unread. Returns `None` if
    /// its id is already present or was deleted this session.
    pub fn add_from_event(
        &mut self,
        payload: NotificationPayload,
        now: DateTime<Utc>,
    ) -> Option<&Notification> {
        let id = payload.id.clone().unwrap_or_else(NotificationId::local);
        if self.removed.contains(&id) || !self.ids.insert(id.clone()) {
            debug!(id = %id, "Duplicate notification suppressed");
            return None;
        }

        let mut notification = build(payload, id, now);
        notification.is_read = false;
        self.items.insert(0, notification);
        self.unread += 1;
        self.items.first()
    }

    /// Returns `true` if the notification went from unread to read.
    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        match self.items.iter_mut().find(|n| &n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                self.unread -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for n in self.items.iter_mut().filter(|n| !n.is_read) {
            n.is_read = true;
            changed += 1;
        }
        self.unread -= changed;
        changed
    }

    pub fn delete(&mut self, id: &NotificationId) -> Option<Notification> {
        let position = self.items.iter().position(|n| &n.id == id)?;
        let removed = self.items.remove(position);
        if !removed.is_read {
            self.unread -= 1;
        }
        self.ids.remove(id);
        self.removed.insert(id.clone());
        Some(removed)
    }
}

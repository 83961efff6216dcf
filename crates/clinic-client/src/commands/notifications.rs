//! Chat list and notification feed bootstrap, read and delete operations.
//!
//! Mutations are applied locally first. A failed backend call leaves the
//! local change in place; the next refresh brings back server truth.

use chrono::Utc;
use tracing::{debug, info};

use clinic_shared::NotificationId;

use crate::error::SessionError;
use crate::events::UiEvent;
use crate::session::{lock, Session};

impl Session {
    /// Replace the chat list with the server's. Returns the entry count.
    pub async fn refresh_chat_list(&self) -> Result<usize, SessionError> {
        let entries = match self.api.fetch_chat_list().await {
            Ok(entries) => entries,
            Err(source) => {
                self.report_sync_failure("fetch_chat_list", &source);
                return Err(SessionError::Fetch {
                    what: "chat list",
                    source,
                });
            }
        };

        let (count, total_unread) = {
            let mut state = lock(&self.state)?;
            for entry in &entries {
                state.peers.remember(&entry.peer);
            }
            state.chat_list.replace_all(entries);
            (state.chat_list.len(), state.chat_list.total_unread())
        };
        info!(count, total_unread, "Chat list loaded");
        self.emit(UiEvent::ChatListChanged { total_unread });
        Ok(count)
    }

    /// Replace the notification feed with the server's. Returns the unread
    /// count.
    pub async fn refresh_notifications(&self) -> Result<usize, SessionError> {
        let fetched = match self.api.fetch_notifications().await {
            Ok(fetched) => fetched,
            Err(source) => {
                self.report_sync_failure("fetch_notifications", &source);
                return Err(SessionError::Fetch {
                    what: "notifications",
                    source,
                });
            }
        };

        let unread = {
            let mut state = lock(&self.state)?;
            state.notifications.load(fetched, Utc::now());
            state.notifications.unread_count()
        };
        self.emit(UiEvent::UnreadChanged { unread });
        Ok(unread)
    }

    /// Returns `false` if the notification was unknown or already read.
    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<bool, SessionError> {
        let (changed, unread) = {
            let mut state = lock(&self.state)?;
            let changed = state.notifications.mark_read(id);
            (changed, state.notifications.unread_count())
        };
        if !changed {
            return Ok(false);
        }
        self.emit(UiEvent::UnreadChanged { unread });

        if id.is_local() {
            debug!(id = %id, "Local-only notification, nothing to sync");
            return Ok(true);
        }
        self.api
            .mark_notification_read(id)
            .await
            .map_err(|source| {
                self.report_sync_failure("mark_notification_read", &source);
                SessionError::MutationSync {
                    action: "mark_notification_read",
                    source,
                }
            })?;
        Ok(true)
    }

    /// Returns how many notifications changed state.
    pub async fn mark_all_notifications_read(&self) -> Result<usize, SessionError> {
        let changed = lock(&self.state)?.notifications.mark_all_read();
        if changed == 0 {
            return Ok(0);
        }
        self.emit(UiEvent::UnreadChanged { unread: 0 });

        self.api
            .mark_all_notifications_read()
            .await
            .map_err(|source| {
                self.report_sync_failure("mark_all_notifications_read", &source);
                SessionError::MutationSync {
                    action: "mark_all_notifications_read",
                    source,
                }
            })?;
        Ok(changed)
    }

    /// Returns `false` if the notification was not in the feed.
    pub async fn delete_notification(&self, id: &NotificationId) -> Result<bool, SessionError> {
        let (removed, unread) = {
            let mut state = lock(&self.state)?;
            let removed = state.notifications.delete(id);
            (removed, state.notifications.unread_count())
        };
        let Some(removed) = removed else {
            return Ok(false);
        };
        if !removed.is_read {
            self.emit(UiEvent::UnreadChanged { unread });
        }

        if id.is_local() {
            return Ok(true);
        }
        self.api.delete_notification(id).await.map_err(|source| {
            self.report_sync_failure("delete_notification", &source);
            SessionError::MutationSync {
                action: "delete_notification",
                source,
            }
        })?;
        Ok(true)
    }
}

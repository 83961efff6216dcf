//! The portal REST backend as seen by the sync engine.
//!
//! Every call is an opaque async operation that succeeds or fails; retry and
//! timeout policy belong to the implementation.

use async_trait::async_trait;
use thiserror::Error;

use clinic_shared::{ContactAddress, NotificationId, NotificationPayload, Peer};
use clinic_store::{ChatListEntry, MessageRecord};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PortalApi: Send + Sync {
    /// `GET /conversations`
    async fn fetch_chat_list(&self) -> Result<Vec<ChatListEntry>, ApiError>;

    /// `GET /conversations/{peer}`
    async fn fetch_conversation(
        &self,
        peer: &ContactAddress,
    ) -> Result<Vec<MessageRecord>, ApiError>;

    /// `POST /messages`
    async fn send_message(&self, receiver: &Peer, body: &str) -> Result<MessageRecord, ApiError>;

    /// `PATCH /conversations/{peer}/read`
    async fn mark_conversation_read(&self, peer: &ContactAddress) -> Result<(), ApiError>;

    /// `GET /notifications`
    async fn fetch_notifications(&self) -> Result<Vec<NotificationPayload>, ApiError>;

    /// `PATCH /notifications/{id}/read`
    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), ApiError>;

    /// `PATCH /notifications/read-all`
    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;

    /// `DELETE /notifications/{id}`
    async fn delete_notification(&self, id: &NotificationId) -> Result<(), ApiError>;
}

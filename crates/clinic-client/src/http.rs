//! `reqwest` implementation of [`PortalApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use clinic_shared::{ContactAddress, NotificationId, NotificationPayload, Peer};
use clinic_store::{ChatListEntry, MessageRecord};

use crate::api::{ApiError, PortalApi};
use crate::config::ClientConfig;

pub struct HttpPortalApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPortalApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "API request");
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let value: Value = self.send(builder).await?.json().await?;
        Ok(serde_json::from_value(unwrap_data(value))?)
    }
}

/// Resource responses may be wrapped in `{"data": ...}`.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn fetch_chat_list(&self) -> Result<Vec<ChatListEntry>, ApiError> {
        self.json(self.request(Method::GET, "/conversations")).await
    }

    async fn fetch_conversation(
        &self,
        peer: &ContactAddress,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        self.json(self.request(Method::GET, &format!("/conversations/{peer}")))
            .await
    }

    async fn send_message(&self, receiver: &Peer, body: &str) -> Result<MessageRecord, ApiError> {
        let payload = json!({
            "receiver_id": receiver.id,
            "receiver_contact_number": receiver.contact,
            "message": body,
        });
        self.json(self.request(Method::POST, "/messages").json(&payload))
            .await
    }

    async fn mark_conversation_read(&self, peer: &ContactAddress) -> Result<(), ApiError> {
        self.send(self.request(Method::PATCH, &format!("/conversations/{peer}/read")))
            .await?;
        Ok(())
    }

    async fn fetch_notifications(&self) -> Result<Vec<NotificationPayload>, ApiError> {
        self.json(self.request(Method::GET, "/notifications")).await
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.send(self.request(Method::PATCH, &format!("/notifications/{id}/read")))
            .await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.send(self.request(Method::PATCH, "/notifications/read-all"))
            .await?;
        Ok(())
    }

    async fn delete_notification(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &format!("/notifications/{id}")))
            .await?;
        Ok(())
    }
}

//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so a session can start with zero
//! configuration against a local backend.

use clinic_shared::constants::DEFAULT_EVENT_BUFFER;
use clinic_shared::{ContactAddress, LocalUser, UserId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the portal REST API.
    /// Env: `CLINIC_API_URL`
    /// Default: `http://127.0.0.1:8000/api`
    pub api_url: String,

    /// Bearer token for the REST API.
    /// Env: `CLINIC_API_TOKEN`
    /// Default: none.
    pub api_token: Option<String>,

    /// Internal id of the signed-in user.
    /// Env: `CLINIC_USER_ID`
    /// Default: `0`
    pub user_id: UserId,

    /// Contact address of the signed-in user; names the own push channel.
    /// Env: `CLINIC_CONTACT`
    /// Default: empty.
    pub contact: ContactAddress,

    /// Capacity of the transport notification channel.
    /// Env: `CLINIC_EVENT_BUFFER`
    /// Default: `256`
    pub event_buffer: usize,

    /// Per-request HTTP timeout in seconds.
    /// Env: `CLINIC_REQUEST_TIMEOUT_SECS`
    /// Default: `15`
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api".to_string(),
            api_token: None,
            user_id: UserId(0),
            contact: ContactAddress::new(""),
            event_buffer: DEFAULT_EVENT_BUFFER,
            request_timeout_secs: 15,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CLINIC_API_URL") {
            config.api_url = url;
        }

        if let Some(token) = lookup("CLINIC_API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        if let Some(val) = lookup("CLINIC_USER_ID") {
            match val.trim().parse::<u64>() {
                Ok(id) => config.user_id = UserId(id),
                Err(_) => tracing::warn!(value = %val, "Invalid CLINIC_USER_ID, using default"),
            }
        }

        if let Some(contact) = lookup("CLINIC_CONTACT") {
            config.contact = ContactAddress::new(contact.trim());
        }

        if let Some(val) = lookup("CLINIC_EVENT_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.event_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid CLINIC_EVENT_BUFFER, using default"),
            }
        }

        if let Some(val) = lookup("CLINIC_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.request_timeout_secs = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CLINIC_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        config
    }

    pub fn local_user(&self) -> LocalUser {
        LocalUser::new(self.user_id, self.contact.clone())
    }
}

//! Outbound session operations.
//!
//! Each sub-module extends [`crate::Session`] with the operations of one
//! domain. All of them follow the same shape: apply the change to local
//! state under the lock, release it, then await the REST call.

pub mod messaging;
pub mod notifications;

use tracing::warn;

use crate::api::ApiError;
use crate::events::UiEvent;
use crate::session::Session;

impl Session {
    /// Log a failed backend call and raise the generic sync indicator.
    pub(crate) fn report_sync_failure(&self, action: &'static str, error: &ApiError) {
        warn!(action, error = %error, "Backend call failed");
        self.emit(UiEvent::SyncFailed {
            action: action.to_string(),
            error: error.to_string(),
        });
    }
}

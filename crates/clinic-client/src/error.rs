use thiserror::Error;

use clinic_net::NetError;
use clinic_shared::CorrelationId;

use crate::api::ApiError;

/// Failures surfaced to the UI by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The optimistic message was rolled back; the UI offers a retry.
    #[error("Could not send message {correlation_id}: {source}")]
    SendFailed {
        correlation_id: CorrelationId,
        #[source]
        source: ApiError,
    },

    /// A read/delete call failed after the local state already changed.
    /// The local change is kept until the next full refetch.
    #[error("{action} was applied locally but not on the server: {source}")]
    MutationSync {
        action: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Could not load {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Session state lock poisoned")]
    StatePoisoned,

    /// Replayed frames were published but the session never caught up.
    #[error("Replay of {published} frames did not drain")]
    ReplayStalled { published: usize },

    #[error("Transport error: {0}")]
    Net(#[from] NetError),
}

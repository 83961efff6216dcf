use thiserror::Error;

/// Failures while decoding a raw push payload into a [`crate::PushEvent`].
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload for {0} has no routing fields")]
    MissingRouting(String),
}

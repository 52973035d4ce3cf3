use thiserror::Error;

/// Failure to turn an inbound broker frame into a typed event.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame arrived on unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("malformed payload on {topic}: {source}")]
    MalformedPayload {
        topic: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

//! Errors raised while decoding inbound frames.

/// A frame that could not be turned into a [`ServerEvent`](crate::ServerEvent).
///
/// Decode failures are always recoverable: the frame is logged and dropped and
/// the next frame is processed normally.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` field")]
    MissingType,
    #[error("frame `type` is not a string")]
    InvalidType,
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

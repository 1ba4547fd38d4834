use thiserror::Error;

use crate::StreamKey;

/// Type alias of the [`Result`] type specific to `streambus`.
pub type BusResult<T, E> = std::result::Result<T, BusErr<E>>;

/// Errors a subscriber callback may raise.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
/// Common errors that may occur, generic over the backend error type.
pub enum BusErr<E: std::error::Error> {
    #[error("Connection Error: {0}")]
    Connect(String),
    #[error("A subscriber is already bound to this sink")]
    AlreadySubscribed,
    #[error("Stream key `{0}` already has a live subscription")]
    SubscriptionConflict(StreamKey),
    #[error("Message body is empty; nothing to publish")]
    EmptyPayload,
    #[error("Container is closed")]
    Closed,
    #[error("StreamKeyErr {0}")]
    StreamKeyErr(#[from] StreamKeyErr),
    #[error("Backend error: {0}")]
    Backend(E),
}

#[derive(Error, Debug, Clone)]
/// Errors that may happen when handling StreamKey and MessageId strings.
pub enum StreamKeyErr {
    #[error("Invalid stream key: valid pattern is [a-zA-Z0-9._-]{{1, 249}}")]
    InvalidStreamKey,
    #[error("Invalid message id: expected `millis-seq`")]
    InvalidMessageId,
}

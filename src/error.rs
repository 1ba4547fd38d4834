use redis::{ErrorKind, RedisError};
use streambus_types::{BusErr, BusResult};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
/// Failures of the external source, as surfaced to sinks and callers.
pub enum SourceErr {
    #[error("Failed to parse message ID: {0}")]
    MessageId(String),
    #[error("Failed to parse stream fetch reply: {0}")]
    FetchReply(String),
    #[error("The authentication with the server failed: {0}")]
    AuthenticationFailed(String),
    #[error("Operation failed because of a type mismatch: {0}")]
    TypeError(String),
    #[error("The server generated an invalid response: {0}")]
    ResponseError(String),
    #[error("The server cannot respond because it's loading a dump: {0}")]
    BusyLoadingError(String),
    #[error("An error that was caused because the parameter to the client were wrong: {0}")]
    InvalidClientConfig(String),
    #[error("Raised if a request needs to be retried: {0}")]
    TryAgain(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("An error raised that was identified on the client before execution: {0}")]
    ClientError(String),
    #[error("Extension error: {0}")]
    ExtensionError(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A type alias for convenience.
pub type SourceResult<T> = BusResult<T, SourceErr>;

pub(crate) fn map_err(err: RedisError) -> BusErr<SourceErr> {
    let e = format!("{err}");
    BusErr::Backend(match err.kind() {
        ErrorKind::AuthenticationFailed => SourceErr::AuthenticationFailed(e),
        ErrorKind::TypeError => SourceErr::TypeError(e),
        ErrorKind::ResponseError => SourceErr::ResponseError(e),
        ErrorKind::BusyLoadingError => SourceErr::BusyLoadingError(e),
        ErrorKind::InvalidClientConfig => SourceErr::InvalidClientConfig(e),
        ErrorKind::TryAgain | ErrorKind::Ask | ErrorKind::ClusterDown | ErrorKind::MasterDown => {
            SourceErr::TryAgain(e)
        }
        ErrorKind::IoError => SourceErr::IoError(e),
        ErrorKind::ClientError => SourceErr::ClientError(e),
        ErrorKind::ExtensionError => SourceErr::ExtensionError(e),
        _ => SourceErr::Unknown(e),
    })
}

//! OBD-II Session Error Types

use thiserror::Error;

/// Errors that can occur while operating a session with an OBD-II adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObdError {
    /// The transport could not open a session with the adapter
    #[error("connection failed: {0}")]
    TransportConnect(String),

    /// A live session failed while reading or writing
    #[error("connection lost: {0}")]
    TransportIo(String),

    /// A write was attempted outside the Connected state
    #[error("not connected")]
    NotConnected,

    /// A connect was attempted while a session is pending or live
    #[error("a connection is already pending or established")]
    AlreadyConnecting,
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::TransportIo(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::TransportConnect(err.to_string())
    }
}

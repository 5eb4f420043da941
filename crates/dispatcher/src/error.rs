//! Dispatcher Error Types

use generation::GenerationError;
use obd_protocol::ObdError;
use query_router::RouteError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by dispatcher operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] ObdError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for DispatchError {
    fn from(err: config::ConfigError) -> Self {
        DispatchError::Config(err.to_string())
    }
}

/// Error kind reported to the caller on the event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    TransportConnectError,
    TransportIoError,
    NotConnected,
    AlreadyConnecting,
    MalformedCommandCode,
    Oracle,
    Generation,
    Config,
}

impl DispatchError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Session(ObdError::TransportConnect(_)) => ErrorKind::TransportConnectError,
            DispatchError::Session(ObdError::TransportIo(_)) => ErrorKind::TransportIoError,
            DispatchError::Session(ObdError::NotConnected) => ErrorKind::NotConnected,
            DispatchError::Session(ObdError::AlreadyConnecting) => ErrorKind::AlreadyConnecting,
            DispatchError::Route(RouteError::MalformedCommandCode { .. }) => ErrorKind::MalformedCommandCode,
            DispatchError::Route(_) => ErrorKind::Oracle,
            DispatchError::Generation(_) => ErrorKind::Generation,
            DispatchError::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DispatchError::from(ObdError::NotConnected).kind(), ErrorKind::NotConnected);
        assert_eq!(
            DispatchError::from(ObdError::TransportIo("reset".to_string())).kind(),
            ErrorKind::TransportIoError
        );
        assert_eq!(
            DispatchError::from(RouteError::MalformedCommandCode { code: "01".to_string(), width: 4 }).kind(),
            ErrorKind::MalformedCommandCode
        );
    }

    #[test]
    fn test_transport_messages_pass_through() {
        let err = DispatchError::from(ObdError::TransportConnect("no such device".to_string()));
        assert_eq!(err.to_string(), "connection failed: no such device");
    }
}

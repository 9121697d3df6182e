//! Client error types.

use livefolio_core::EncodeError;
use thiserror::Error;

/// Errors surfaced by the client crate.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport's outbound side is gone.
    #[error("transport closed")]
    TransportClosed,
    /// WebSocket handshake or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// An outbound message could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Session store could not be read or written.
    #[error("session store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),
    /// Session store contents are not valid JSON.
    #[error("session store JSON error: {0}")]
    StoreJson(#[from] serde_json::Error),
    /// The manager's control loop has exited.
    #[error("connection manager has stopped")]
    ManagerStopped,
}

/// Errors from [`crate::ReconnectPolicy`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconnectError {
    /// A retry is already pending; cancel it before scheduling another.
    #[error("a reconnect is already scheduled")]
    AlreadyScheduled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(ClientError::TransportClosed.to_string(), "transport closed");
        assert_eq!(
            ClientError::WebSocket("refused".into()).to_string(),
            "websocket error: refused"
        );
        assert_eq!(
            ReconnectError::AlreadyScheduled.to_string(),
            "a reconnect is already scheduled"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: ClientError = std::io::Error::other("disk full").into();
        assert!(matches!(err, ClientError::StoreIo(_)));
    }
}

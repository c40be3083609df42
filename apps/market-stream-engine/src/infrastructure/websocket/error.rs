//! Engine Errors
//!
//! Errors returned by the engine's public API, and the mapping from
//! transport errors onto [`ConnectionFailure`].

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

use crate::domain::{ConnectionFailure, ConnectionState};

/// Errors returned by [`ConnectionEngine`](super::ConnectionEngine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Outbound write attempted while not in the `Connected` state.
    #[error("not connected (state={0})")]
    NotConnected(ConnectionState),

    /// `initialize` was called twice.
    #[error("engine already initialized")]
    AlreadyInitialized,

    /// The engine has been closed.
    #[error("engine closed")]
    Closed,

    /// Loops could not be scheduled.
    #[error("failed to initialize engine: {0}")]
    Initialization(String),

    /// The socket write failed.
    #[error("send failed: {0}")]
    Send(#[from] ConnectionFailure),
}

impl From<tungstenite::Error> for ConnectionFailure {
    fn from(err: tungstenite::Error) -> Self {
        use tungstenite::Error;

        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => Self::StreamEnded,
            Error::Io(e) => Self::Network(e.to_string()),
            Error::Tls(e) => Self::Network(e.to_string()),
            Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => Self::StreamEnded,
            Error::Protocol(e) => Self::Protocol(e.to_string()),
            Error::Capacity(e) => Self::Protocol(e.to_string()),
            Error::Utf8(e) => Self::Protocol(format!("invalid utf-8: {e}")),
            Error::AttackAttempt => Self::Protocol("attack attempt detected".to_string()),
            Error::Url(e) => Self::Protocol(e.to_string()),
            Error::Http(response) => Self::HandshakeRejected {
                status: response.status().as_u16(),
            },
            Error::HttpFormat(e) => Self::Protocol(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCategory;

    #[test]
    fn reset_without_close_is_abnormal() {
        let failure = ConnectionFailure::from(tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake,
        ));
        assert_eq!(failure.default_category(), ErrorCategory::AbnormalClosure);
    }

    #[test]
    fn io_errors_are_network_errors() {
        let failure = ConnectionFailure::from(tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(failure.default_category(), ErrorCategory::NetworkError);
    }

    #[test]
    fn protocol_violations_are_terminal() {
        let failure = ConnectionFailure::from(tungstenite::Error::Protocol(
            ProtocolError::UnmaskedFrameFromClient,
        ));
        assert!(failure.default_category().is_terminal());
    }

    #[test]
    fn not_connected_message() {
        let err = EngineError::NotConnected(ConnectionState::Reconnecting);
        assert_eq!(err.to_string(), "not connected (state=reconnecting)");
    }
}

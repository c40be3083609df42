//! Connection Failures
//!
//! Transport-independent description of why a connection attempt ended.
//! Venue connection policies classify these into an [`ErrorCategory`].

use thiserror::Error;

use super::connection::ErrorCategory;

/// Close codes that carry no application status.
const CLOSE_NO_STATUS: u16 = 1005;
const CLOSE_ABNORMAL: u16 = 1006;

/// Close codes that signal a protocol violation by one of the peers.
const CLOSE_PROTOCOL: u16 = 1002;
const CLOSE_UNSUPPORTED: u16 = 1003;
const CLOSE_INVALID_PAYLOAD: u16 = 1007;

/// Why a connection attempt or an established connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionFailure {
    /// Peer sent a close frame. `code` is `None` when the frame had no
    /// status.
    #[error("closed by peer (code={code:?}, reason={reason})")]
    Closed {
        /// Close status code.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },

    /// The stream ended or was reset without a close handshake.
    #[error("stream ended without close handshake")]
    StreamEnded,

    /// Socket, DNS or TLS failure.
    #[error("network error: {0}")]
    Network(String),

    /// Connect deadline exceeded.
    #[error("connect timed out")]
    ConnectTimeout,

    /// No inbound traffic within the heartbeat timeout.
    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    /// The HTTP upgrade was answered with a non-101 status.
    #[error("handshake rejected with HTTP {status}")]
    HandshakeRejected {
        /// HTTP status code.
        status: u16,
    },

    /// Frame or handshake the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Authentication required but credentials are absent.
    #[error("credentials missing for authenticated stream")]
    MissingCredentials,

    /// Venue rejected the handshake, or confirmation never arrived.
    #[error("authentication failed: {0}")]
    AuthRejected(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl ConnectionFailure {
    /// Category used when a venue has no opinion of its own.
    #[must_use]
    pub fn default_category(&self) -> ErrorCategory {
        match self {
            Self::Closed { code, .. } => match code {
                None | Some(CLOSE_NO_STATUS | CLOSE_ABNORMAL) => ErrorCategory::AbnormalClosure,
                Some(CLOSE_PROTOCOL | CLOSE_UNSUPPORTED | CLOSE_INVALID_PAYLOAD) => {
                    ErrorCategory::ProtocolError
                }
                Some(_) => ErrorCategory::Unknown,
            },
            Self::StreamEnded => ErrorCategory::AbnormalClosure,
            Self::Network(_) => ErrorCategory::NetworkError,
            Self::ConnectTimeout | Self::HeartbeatTimeout => ErrorCategory::Timeout,
            Self::HandshakeRejected { status } => match status {
                401 | 403 => ErrorCategory::AuthFailure,
                // 429 and 5xx are transient on every venue we talk to.
                429 | 500..=599 => ErrorCategory::NetworkError,
                _ => ErrorCategory::ProtocolError,
            },
            Self::Protocol(_) => ErrorCategory::ProtocolError,
            Self::MissingCredentials | Self::AuthRejected(_) => ErrorCategory::AuthFailure,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

//! Auth Policy Port (Driven Port)
//!
//! Per-venue authentication handshake. The handshake message is written
//! through the engine's socket, and confirmation is observed on the normal
//! message-processing path, never on a side channel.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ConnectionFailure;

/// Default time allowed for the venue to confirm a handshake.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Stream requires credentials but none were configured.
    #[error("credentials missing")]
    MissingCredentials,

    /// Venue rejected the handshake.
    #[error("authentication rejected: {0}")]
    Rejected(String),

    /// Confirmation did not arrive in time.
    #[error("authentication confirmation timed out after {0:?}")]
    Timeout(Duration),

    /// Could not build the handshake message.
    #[error("failed to build auth message: {0}")]
    Message(String),

    /// Could not write the handshake to the socket.
    #[error("failed to send auth message: {0}")]
    Send(String),
}

impl From<AuthError> for ConnectionFailure {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => Self::MissingCredentials,
            // The socket failed under the handshake; retry like any drop.
            AuthError::Send(reason) => Self::Network(reason),
            other => Self::AuthRejected(other.to_string()),
        }
    }
}

/// Writes raw text frames to the socket that is currently being
/// authenticated.
#[async_trait]
pub trait WireSender: Send + Sync {
    /// Write a text frame.
    async fn send_text(&self, text: String) -> Result<(), ConnectionFailure>;
}

/// Venue authentication strategy.
#[async_trait]
pub trait AuthPolicy: Send + Sync {
    /// Whether this stream needs a signed handshake.
    fn requires_auth(&self) -> bool;

    /// Build the handshake message.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or signing fails.
    fn create_auth_message(&self) -> Result<String, AuthError>;

    /// Wait for the venue to confirm the handshake.
    ///
    /// Returns `false` on rejection or timeout.
    async fn await_confirmation(&self, timeout: Duration) -> bool;

    /// Forget any confirmation from a previous connection.
    fn reset(&self) {}

    /// How long `authenticate` waits for confirmation.
    fn auth_timeout(&self) -> Duration {
        DEFAULT_AUTH_TIMEOUT
    }

    /// Why an unconfirmed handshake failed. Called after
    /// [`await_confirmation`](Self::await_confirmation) returns `false`.
    fn confirmation_error(&self, timeout: Duration) -> AuthError {
        AuthError::Timeout(timeout)
    }

    /// Send the handshake and wait for confirmation, keeping the reason
    /// for any failure.
    ///
    /// # Errors
    ///
    /// Returns the first step that failed: building the message, writing
    /// it, or the venue's confirmation.
    async fn perform_handshake(&self, sender: &dyn WireSender) -> Result<(), AuthError> {
        if !self.requires_auth() {
            return Ok(());
        }

        self.reset();

        let message = self.create_auth_message()?;
        sender
            .send_text(message)
            .await
            .map_err(|e| AuthError::Send(e.to_string()))?;

        let timeout = self.auth_timeout();
        if self.await_confirmation(timeout).await {
            Ok(())
        } else {
            Err(self.confirmation_error(timeout))
        }
    }

    /// Send the handshake and wait for confirmation.
    ///
    /// Returns `true` immediately when the stream needs no authentication.
    async fn authenticate(&self, sender: &dyn WireSender) -> bool {
        match self.perform_handshake(sender).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Authentication failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_maps_to_dedicated_failure() {
        assert_eq!(
            ConnectionFailure::from(AuthError::MissingCredentials),
            ConnectionFailure::MissingCredentials
        );
        assert!(matches!(
            ConnectionFailure::from(AuthError::Timeout(DEFAULT_AUTH_TIMEOUT)),
            ConnectionFailure::AuthRejected(_)
        ));
    }

    #[test]
    fn handshake_write_failure_is_a_transport_failure() {
        let failure = ConnectionFailure::from(AuthError::Send("stream ended".to_string()));
        assert_eq!(failure, ConnectionFailure::Network("stream ended".to_string()));
        assert!(!failure.default_category().is_terminal());
    }
}

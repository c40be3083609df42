//! Stream Authentication Policies
//!
//! # Variants
//!
//! - [`NoAuth`]: public market-data streams; `authenticate` returns `true`
//!   without touching the socket.
//! - [`SignedAuth`]: private streams; sends a timestamped HMAC-SHA256
//!   signed handshake and waits for the venue's auth response.
//!
//! # Signed Handshake (Bybit v5)
//!
//! ```text
//! expires   = now_ms + 10_000
//! signature = hex(HMAC_SHA256(secret, "GET/realtime" + expires))
//! message   = {"op":"auth","args":[api_key, expires, signature]}
//! ```
//!
//! The response (`{"op":"auth","success":true,...}`) is classified as
//! `AuthResponse` and handled by the private message handler, which
//! resolves the shared [`AuthSignal`] this policy waits on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ring::hmac;
use serde::Serialize;

use crate::application::ports::{AuthError, AuthPolicy, DEFAULT_AUTH_TIMEOUT};
use crate::application::services::{AuthOutcome, AuthSignal};
use crate::infrastructure::config::Credentials;

/// Prefix of the signed payload.
const SIGNATURE_PREFIX: &str = "GET/realtime";

/// How far ahead the signature expires.
const EXPIRY_WINDOW_MS: i64 = 10_000;

// =============================================================================
// No Authentication
// =============================================================================

/// Policy for streams that need no handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthPolicy for NoAuth {
    fn requires_auth(&self) -> bool {
        false
    }

    fn create_auth_message(&self) -> Result<String, AuthError> {
        Err(AuthError::Message("stream does not authenticate".to_string()))
    }

    async fn await_confirmation(&self, _timeout: Duration) -> bool {
        true
    }
}

// =============================================================================
// Signed Authentication
// =============================================================================

#[derive(Serialize)]
struct AuthRequest<'a> {
    op: &'static str,
    args: (&'a str, i64, &'a str),
}

/// HMAC-signed handshake for private streams.
#[derive(Debug)]
pub struct SignedAuth {
    credentials: Option<Credentials>,
    signal: Arc<AuthSignal>,
    timeout: Duration,
}

impl SignedAuth {
    /// Create a policy. `credentials` may be absent, in which case every
    /// authentication attempt fails.
    #[must_use]
    pub fn new(credentials: Option<Credentials>, signal: Arc<AuthSignal>) -> Self {
        Self {
            credentials,
            signal,
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Override the confirmation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Signal shared with the private message handler.
    #[must_use]
    pub fn signal(&self) -> &Arc<AuthSignal> {
        &self.signal
    }

    /// Build the handshake for a given expiry timestamp.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredentials` when no key/secret is configured.
    pub fn auth_message_at(&self, expires_ms: i64) -> Result<String, AuthError> {
        let credentials = self
            .credentials
            .as_ref()
            .filter(|c| !c.api_key().is_empty() && !c.api_secret().is_empty())
            .ok_or(AuthError::MissingCredentials)?;

        let signature = sign(
            credentials.api_secret(),
            &format!("{SIGNATURE_PREFIX}{expires_ms}"),
        );
        let request = AuthRequest {
            op: "auth",
            args: (credentials.api_key(), expires_ms, &signature),
        };
        serde_json::to_string(&request).map_err(|e| AuthError::Message(e.to_string()))
    }
}

#[async_trait]
impl AuthPolicy for SignedAuth {
    fn requires_auth(&self) -> bool {
        true
    }

    fn create_auth_message(&self) -> Result<String, AuthError> {
        let expires = chrono::Utc::now().timestamp_millis() + EXPIRY_WINDOW_MS;
        self.auth_message_at(expires)
    }

    async fn await_confirmation(&self, timeout: Duration) -> bool {
        let confirmed = self.signal.wait(timeout).await;
        if !confirmed {
            tracing::warn!(
                outcome = ?self.signal.outcome(),
                timeout_ms = timeout.as_millis(),
                "Authentication not confirmed"
            );
        }
        confirmed
    }

    fn confirmation_error(&self, timeout: Duration) -> AuthError {
        match self.signal.outcome() {
            AuthOutcome::Rejected(reason) => AuthError::Rejected(reason),
            AuthOutcome::Pending | AuthOutcome::Confirmed => AuthError::Timeout(timeout),
        }
    }

    fn reset(&self) {
        self.signal.reset();
    }

    fn auth_timeout(&self) -> Duration {
        self.timeout
    }
}

/// HMAC-SHA256 of `message` keyed by `secret`, lowercase hex.
#[must_use]
pub fn sign(secret: &str, message: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hex::encode(hmac::sign(&key, message.as_bytes()).as_ref())
}

//! Authentication Signal
//!
//! Shared between a signed [`AuthPolicy`](crate::application::ports::AuthPolicy)
//! and the private message handler. The handler resolves it when the venue's
//! auth response comes through the normal pipeline; the policy waits on it.

use std::time::Duration;

use tokio::sync::watch;

/// Authentication progress for the current connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthOutcome {
    /// Handshake not sent or not answered yet.
    #[default]
    Pending,
    /// Venue accepted the handshake.
    Confirmed,
    /// Venue rejected the handshake.
    Rejected(String),
}

/// Watch-backed confirmation flag.
#[derive(Debug)]
pub struct AuthSignal {
    tx: watch::Sender<AuthOutcome>,
}

impl Default for AuthSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSignal {
    /// Create a pending signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthOutcome::Pending);
        Self { tx }
    }

    /// Back to pending for a new connection.
    pub fn reset(&self) {
        self.tx.send_replace(AuthOutcome::Pending);
    }

    /// Mark the handshake accepted.
    pub fn confirm(&self) {
        self.tx.send_replace(AuthOutcome::Confirmed);
    }

    /// Mark the handshake rejected.
    pub fn reject(&self, reason: impl Into<String>) {
        self.tx.send_replace(AuthOutcome::Rejected(reason.into()));
    }

    /// Current outcome.
    #[must_use]
    pub fn outcome(&self) -> AuthOutcome {
        self.tx.borrow().clone()
    }

    /// Whether the handshake has been accepted.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(*self.tx.borrow(), AuthOutcome::Confirmed)
    }

    /// Wait until the outcome leaves `Pending` or `timeout` elapses.
    ///
    /// Returns `true` only on confirmation.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let resolved = tokio::time::timeout(
            timeout,
            rx.wait_for(|outcome| *outcome != AuthOutcome::Pending),
        )
        .await;

        match resolved {
            Ok(Ok(outcome)) => matches!(*outcome, AuthOutcome::Confirmed),
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis(), "Auth confirmation timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn confirmation_wakes_waiter() {
        let signal = Arc::new(AuthSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait(Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.confirm();

        assert!(waiter.await.unwrap());
        assert!(signal.is_confirmed());
    }

    #[tokio::test]
    async fn rejection_returns_false() {
        let signal = AuthSignal::new();
        signal.reject("invalid signature");
        assert!(!signal.wait(Duration::from_secs(1)).await);
        assert_eq!(
            signal.outcome(),
            AuthOutcome::Rejected("invalid signature".into())
        );
    }

    #[tokio::test]
    async fn timeout_returns_false() {
        let signal = AuthSignal::new();
        assert!(!signal.wait(Duration::from_millis(20)).await);
    }

    #[test]
    fn reset_clears_confirmation() {
        let signal = AuthSignal::new();
        signal.confirm();
        signal.reset();
        assert_eq!(signal.outcome(), AuthOutcome::Pending);
    }
}

//! Connection Policy Port (Driven Port)
//!
//! Per-venue connection parameters and the reconnection decision.

use crate::domain::{
    ConnectionContext, ConnectionFailure, ErrorCategory, HeartbeatAction, ReconnectionPolicy,
    Venue,
};

/// Venue connection strategy.
///
/// Implementations are small value objects; the engine asks for a fresh
/// [`ConnectionContext`] on every attempt.
pub trait ConnectionPolicy: Send + Sync {
    /// Venue this policy connects to.
    fn venue(&self) -> Venue;

    /// Parameters for the next connection attempt.
    fn create_connection_context(&self) -> ConnectionContext;

    /// Backoff schedule between attempts.
    fn get_reconnection_policy(&self) -> ReconnectionPolicy;

    /// Map a failure onto a category.
    fn classify_error(&self, failure: &ConnectionFailure) -> ErrorCategory {
        failure.default_category()
    }

    /// Whether the engine should try again after this failure.
    ///
    /// Terminal categories never reconnect; implementations may only narrow
    /// this further.
    fn should_reconnect(&self, failure: &ConnectionFailure) -> bool {
        !self.classify_error(failure).is_terminal()
    }

    /// What the heartbeat loop sends on each tick.
    fn heartbeat_action(&self) -> HeartbeatAction {
        HeartbeatAction::PingFrame
    }
}

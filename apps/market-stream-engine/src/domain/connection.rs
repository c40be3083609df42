//! Connection Lifecycle Types
//!
//! Value types describing a single venue connection: its state machine,
//! the parameters used to open it, how failures are categorized, and the
//! pure backoff schedule used between reconnection attempts.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a venue connection.
///
/// Only the connection loop mutates this value, so transitions are strictly
/// sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket is open. Terminal once the connection loop has exited.
    #[default]
    Disconnected = 0,
    /// Opening the socket.
    Connecting = 1,
    /// Socket open (and authenticated, when the venue requires it).
    Connected = 2,
    /// Socket open, signed handshake in flight.
    Authenticating = 3,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting = 4,
    /// Transient marker entered on failure, before the retry decision.
    Error = 5,
}

impl ConnectionState {
    /// Decode from the `u8` representation used for atomic storage.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Authenticating,
            4 => Self::Reconnecting,
            5 => Self::Error,
            _ => Self::Disconnected,
        }
    }

    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Whether outbound application messages may be written.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error Category
// =============================================================================

/// Classification of a connection-lifecycle failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Close without a status code (1006), or the stream ended without a
    /// close handshake.
    AbnormalClosure,
    /// Socket-level I/O failure, DNS failure, TLS failure.
    NetworkError,
    /// Connect or heartbeat deadline exceeded.
    Timeout,
    /// Credentials rejected, missing, or confirmation never arrived.
    AuthFailure,
    /// Malformed handshake or frame the protocol does not allow.
    ProtocolError,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Terminal categories are never retried, regardless of venue.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AuthFailure | Self::ProtocolError)
    }

    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AbnormalClosure => "abnormal_closure",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::AuthFailure => "auth_failure",
            Self::ProtocolError => "protocol_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Context
// =============================================================================

/// Parameters for one connection attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// WebSocket endpoint.
    pub url: String,
    /// Extra handshake headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Heartbeat cadence. `Duration::ZERO` disables the heartbeat loop.
    pub ping_interval: Duration,
    /// Silence tolerated after a heartbeat before the socket is dropped.
    pub ping_timeout: Duration,
    /// Largest accepted frame, `None` for the transport default.
    pub max_frame_size: Option<usize>,
    /// Whether the venue expects per-message compression.
    pub compression: bool,
}

impl ConnectionContext {
    /// Create a context with no headers, no heartbeat and default limits.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            ping_interval: Duration::ZERO,
            ping_timeout: Duration::from_secs(10),
            max_frame_size: None,
            compression: false,
        }
    }

    /// Add a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the heartbeat interval and timeout.
    #[must_use]
    pub const fn with_ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// Cap the frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    /// Whether the heartbeat loop should run at all.
    #[must_use]
    pub const fn heartbeat_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

// =============================================================================
// Heartbeat Action
// =============================================================================

/// What the heartbeat loop writes on each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// A WebSocket ping control frame.
    PingFrame,
    /// A protocol-level keepalive sent as a text frame.
    Text(String),
}

// =============================================================================
// Reconnection Policy
// =============================================================================

/// Backoff schedule between reconnection attempts.
///
/// `next_delay` is a pure function of the attempt index and the failure
/// category. Jitter is opt-in and applied separately by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Delay for attempt 0 and for every fast-retry category.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Categories retried at `initial_delay` regardless of attempt count.
    pub fast_retry_classes: HashSet<ErrorCategory>,
    /// Jitter as a fraction of the delay (e.g., 0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            fast_retry_classes: HashSet::new(),
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectionPolicy {
    /// Create a policy without fast-retry classes or jitter.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
            fast_retry_classes: HashSet::new(),
            jitter_factor: 0.0,
        }
    }

    /// Mark a category as fast-retry.
    #[must_use]
    pub fn with_fast_retry(mut self, category: ErrorCategory) -> Self {
        self.fast_retry_classes.insert(category);
        self
    }

    /// Enable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`, except for
    /// fast-retry categories which always get `initial_delay`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, category: ErrorCategory) -> Duration {
        if self.fast_retry_classes.contains(&category) {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled =
            (self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent)).round();

        #[allow(clippy::cast_precision_loss)]
        let max_nanos = self.max_delay.as_nanos() as f64;
        if !scaled.is_finite() || scaled >= max_nanos {
            return self.max_delay;
        }
        if scaled <= 0.0 {
            return Duration::ZERO;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = scaled as u64;
        Duration::from_nanos(nanos)
    }

    /// Whether attempt number `attempt` (0-based) is still within budget.
    #[must_use]
    pub const fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Randomize a delay by ±`jitter_factor`. Identity when jitter is off.
    #[must_use]
    pub fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Authentication State
// =============================================================================

/// Per-connection authentication progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthState {
    /// Whether this stream needs a signed handshake.
    pub required: bool,
    /// Whether the venue confirmed the handshake.
    pub completed: bool,
    /// When the pending confirmation must have arrived by.
    pub pending_confirmation_deadline: Option<Instant>,
}

impl AuthState {
    /// Fresh state for a new connection attempt.
    #[must_use]
    pub const fn new(required: bool) -> Self {
        Self {
            required,
            completed: !required,
            pending_confirmation_deadline: None,
        }
    }

    /// Record that the handshake is under way and must be confirmed by
    /// `deadline`.
    pub const fn begin(&mut self, deadline: Instant) {
        self.completed = false;
        self.pending_confirmation_deadline = Some(deadline);
    }

    /// Record that the venue confirmed the handshake.
    pub const fn complete(&mut self) {
        self.completed = true;
        self.pending_confirmation_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> ReconnectionPolicy {
        ReconnectionPolicy::new(5, Duration::from_millis(100), 2.0, Duration::from_secs(10))
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authenticating,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn terminal_categories() {
        assert!(ErrorCategory::AuthFailure.is_terminal());
        assert!(ErrorCategory::ProtocolError.is_terminal());
        assert!(!ErrorCategory::AbnormalClosure.is_terminal());
        assert!(!ErrorCategory::NetworkError.is_terminal());
        assert!(!ErrorCategory::Timeout.is_terminal());
        assert!(!ErrorCategory::Unknown.is_terminal());
    }

    #[test]
    fn exponential_schedule() {
        let policy = policy();
        let category = ErrorCategory::NetworkError;
        assert_eq!(policy.next_delay(0, category), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1, category), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2, category), Duration::from_millis(400));
        assert_eq!(policy.next_delay(3, category), Duration::from_millis(800));
    }

    #[test]
    fn schedule_is_capped() {
        let policy = policy();
        assert_eq!(
            policy.next_delay(20, ErrorCategory::Timeout),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.next_delay(u32::MAX, ErrorCategory::Timeout),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn fast_retry_ignores_attempt() {
        let policy = policy().with_fast_retry(ErrorCategory::AbnormalClosure);
        for attempt in 0..10 {
            assert_eq!(
                policy.next_delay(attempt, ErrorCategory::AbnormalClosure),
                Duration::from_millis(100)
            );
        }
        assert_eq!(
            policy.next_delay(3, ErrorCategory::NetworkError),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn attempt_budget() {
        let policy = policy();
        assert!(policy.allows_attempt(4));
        assert!(!policy.allows_attempt(5));

        let unlimited = ReconnectionPolicy::default();
        assert!(unlimited.allows_attempt(u32::MAX));
    }

    #[test]
    fn jitter_bounds() {
        let policy = policy().with_jitter(0.1);
        for _ in 0..100 {
            let millis = policy.apply_jitter(Duration::from_millis(1000)).as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[test]
    fn jitter_disabled_is_identity() {
        let policy = policy();
        assert_eq!(
            policy.apply_jitter(Duration::from_millis(1234)),
            Duration::from_millis(1234)
        );
    }

    #[test]
    fn auth_state_deadline() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut state = AuthState::new(true);
        assert!(!state.completed);
        assert_eq!(state.pending_confirmation_deadline, None);

        state.begin(deadline);
        assert!(!state.completed);
        assert_eq!(state.pending_confirmation_deadline, Some(deadline));

        state.complete();
        assert!(state.completed);
        assert_eq!(state.pending_confirmation_deadline, None);

        assert!(AuthState::new(false).completed);
    }

    #[test]
    fn context_builder() {
        let ctx = ConnectionContext::new("wss://example.test/ws")
            .with_header("User-Agent", "engine")
            .with_ping(Duration::from_secs(20), Duration::from_secs(5))
            .with_max_frame_size(1 << 20);
        assert!(ctx.heartbeat_enabled());
        assert_eq!(ctx.headers.len(), 1);
        assert_eq!(ctx.max_frame_size, Some(1 << 20));
        assert!(!ConnectionContext::new("wss://x").heartbeat_enabled());
    }

    proptest! {
        #[test]
        fn delay_matches_formula(
            initial_ms in 1u64..5_000,
            factor in 1u32..4,
            attempt in 0u32..12,
            max_ms in 1u64..600_000,
        ) {
            let policy = ReconnectionPolicy::new(
                0,
                Duration::from_millis(initial_ms),
                f64::from(factor),
                Duration::from_millis(max_ms),
            );
            let expected_ms = u128::from(initial_ms) * u128::from(factor).pow(attempt);
            let expected = Duration::from_millis(
                u64::try_from(expected_ms.min(u128::from(max_ms))).unwrap(),
            );
            prop_assert_eq!(policy.next_delay(attempt, ErrorCategory::NetworkError), expected);
        }

        #[test]
        fn fast_retry_always_initial(initial_ms in 1u64..5_000, attempt in 0u32..1_000) {
            let policy = ReconnectionPolicy::new(
                0,
                Duration::from_millis(initial_ms),
                3.0,
                Duration::from_secs(60),
            )
            .with_fast_retry(ErrorCategory::AbnormalClosure);
            prop_assert_eq!(
                policy.next_delay(attempt, ErrorCategory::AbnormalClosure),
                Duration::from_millis(initial_ms)
            );
        }
    }
}

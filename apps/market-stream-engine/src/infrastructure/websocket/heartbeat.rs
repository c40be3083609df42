//! Heartbeat Manager
//!
//! Keeps a venue connection honest by requesting a heartbeat action on a
//! fixed interval and reporting a timeout when nothing has been received
//! for too long after a heartbeat went out. The manager only decides; the
//! connection loop performs the write or drops the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ConnectionContext;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat actions.
    pub interval: Duration,
    /// Silence tolerated after a heartbeat before the connection is dead.
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Take the cadence from a connection context. `None` when the venue
    /// disables client heartbeats.
    #[must_use]
    pub const fn from_context(context: &ConnectionContext) -> Option<Self> {
        if context.heartbeat_enabled() {
            Some(Self::new(context.ping_interval, context.ping_timeout))
        } else {
            None
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Perform the venue heartbeat action now.
    Beat,
    /// Nothing received within the timeout; drop the connection.
    Timeout,
}

/// Liveness shared between the reader, the manager and the connection loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
    awaiting_reply: AtomicBool,
    active: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create inactive state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
            awaiting_reply: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Any inbound frame proves the connection is alive.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
        self.awaiting_reply.store(false, Ordering::SeqCst);
    }

    /// A heartbeat was written.
    pub fn mark_sent(&self) {
        self.awaiting_reply.store(true, Ordering::SeqCst);
    }

    /// Whether a heartbeat is outstanding.
    #[must_use]
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }

    /// Start monitoring a freshly opened connection.
    pub fn activate(&self) {
        *self.last_inbound.write() = Instant::now();
        self.awaiting_reply.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop monitoring; ticks are ignored until the next `activate`.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.awaiting_reply.store(false, Ordering::SeqCst);
    }

    /// Whether a connection is being monitored.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Decide what this tick should do.
    #[must_use]
    pub fn evaluate(&self, timeout: Duration) -> Option<HeartbeatEvent> {
        if !self.is_active() {
            return None;
        }
        if self.is_awaiting_reply() && self.time_since_inbound() > timeout {
            return Some(HeartbeatEvent::Timeout);
        }
        Some(HeartbeatEvent::Beat)
    }
}

/// Periodic heartbeat driver.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the event receiver goes away.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the first beat
        // goes out one interval after start.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let Some(event) = self.state.evaluate(self.config.timeout) else {
                        continue;
                    };
                    if event == HeartbeatEvent::Timeout {
                        tracing::warn!(
                            elapsed_ms = self.state.time_since_inbound().as_millis(),
                            timeout_ms = self.config.timeout.as_millis(),
                            "Heartbeat timeout detected"
                        );
                        // Stop escalating until the next connection is up.
                        self.state.deactivate();
                    }
                    if self.event_tx.send(event).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }
}

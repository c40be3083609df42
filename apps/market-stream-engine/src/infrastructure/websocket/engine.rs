//! Connection Engine
//!
//! Owns one venue WebSocket connection for its whole lifetime: connect,
//! authenticate, resubscribe, read, enqueue, reconnect on failure and
//! heartbeat. Raw payloads reach the [`MessageHandler`] only through the
//! bounded processing queue.
//!
//! # Tasks
//!
//! `initialize` spawns up to four tasks that share [`EngineInner`]:
//!
//! - **connection loop**: drives the state machine and owns every write
//! - **reader**: drains the read half of each socket into the queue
//! - **processor**: pops the queue in FIFO order and calls the handler
//! - **heartbeat**: ticks on the venue interval (only when configured)
//!
//! The reader is persistent; the connection loop hands it the read half of
//! every new socket and waits for it to report how the socket ended.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::EngineError;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use crate::application::ports::{AuthError, AuthPolicy, ConnectionPolicy, WireSender};
use crate::application::services::{
    BoundedQueue, CallbackId, CallbackRegistry, DEFAULT_QUEUE_CAPACITY, MessageHandler,
    PerformanceSnapshot, PushOutcome, QueueStats,
};
use crate::domain::{
    AuthState, ConnectionFailure, ConnectionState, ErrorCategory, HeartbeatAction, QueueEntry, RawPayload,
    Venue,
};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Bound on the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Slack past the policy's auth timeout before the engine gives up on a
/// handshake that never resolves.
const AUTH_DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Log every n-th queue drop after the first.
const DROP_LOG_EVERY: u64 = 1000;

// =============================================================================
// Configuration
// =============================================================================

/// Engine tuning independent of the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Processing queue capacity.
    pub queue_capacity: usize,
    /// Bound on TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    /// Buffer for handler-produced protocol replies.
    pub reply_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            reply_capacity: 64,
        }
    }
}

// =============================================================================
// State Change Notification
// =============================================================================

/// A connection state transition, delivered to `on_state_change` callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Venue of the connection.
    pub venue: Venue,
    /// New state.
    pub state: ConnectionState,
    /// Failure category, set on `Error` and on terminal `Disconnected`.
    pub category: Option<ErrorCategory>,
    /// Failure description, alongside `category`.
    pub reason: Option<String>,
}

impl StateChange {
    /// Whether this is the final transition after the loop gave up.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.state, ConnectionState::Disconnected) && self.category.is_some()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Reconnecting WebSocket client for one venue stream.
pub struct ConnectionEngine<H: MessageHandler> {
    inner: Arc<EngineInner<H>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: MessageHandler> std::fmt::Debug for ConnectionEngine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEngine")
            .field("venue", &self.inner.venue)
            .field("state", &self.inner.state())
            .field("queue", &self.inner.queue.stats())
            .finish_non_exhaustive()
    }
}

struct EngineInner<H> {
    venue: Venue,
    connection_policy: Arc<dyn ConnectionPolicy>,
    auth_policy: Arc<dyn AuthPolicy>,
    handler: Arc<H>,
    config: EngineConfig,
    state: AtomicU8,
    queue: BoundedQueue<QueueEntry>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    subscriptions: Mutex<Vec<String>>,
    auth_state: Mutex<AuthState>,
    heartbeat: Arc<HeartbeatState>,
    state_callbacks: CallbackRegistry<StateChange>,
    cancel: CancellationToken,
    initialized: AtomicBool,
    closed: AtomicBool,
}

/// Read half of one socket, handed from the connection loop to the reader.
struct ReaderJob {
    source: WsSource,
    cancel: CancellationToken,
    done: oneshot::Sender<ConnectionFailure>,
}

/// Channels owned by the connection loop.
struct LoopChannels {
    reader_tx: mpsc::Sender<ReaderJob>,
    reply_rx: mpsc::Receiver<String>,
    heartbeat_rx: Option<mpsc::Receiver<HeartbeatEvent>>,
}

impl<H: MessageHandler> ConnectionEngine<H> {
    /// Create an engine. Nothing runs until [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(
        connection_policy: Arc<dyn ConnectionPolicy>,
        auth_policy: Arc<dyn AuthPolicy>,
        handler: Arc<H>,
        config: EngineConfig,
    ) -> Self {
        let venue = connection_policy.venue();
        Self {
            inner: Arc::new(EngineInner {
                venue,
                connection_policy,
                auth_policy,
                handler,
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                queue: BoundedQueue::new(config.queue_capacity),
                writer: tokio::sync::Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                auth_state: Mutex::new(AuthState::default()),
                heartbeat: Arc::new(HeartbeatState::new()),
                state_callbacks: CallbackRegistry::new("connection_state"),
                cancel: CancellationToken::new(),
                initialized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the engine tasks. Returns without waiting for a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if called twice, after `close`, or outside a tokio
    /// runtime.
    pub fn initialize(&self) -> Result<(), EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyInitialized);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Initialization(e.to_string()))?;

        let (reader_tx, reader_rx) = mpsc::channel(1);
        let (reply_tx, reply_rx) = mpsc::channel(self.inner.config.reply_capacity.max(1));
        self.inner.handler.attach_reply_sink(reply_tx);

        let context = self.inner.connection_policy.create_connection_context();
        let heartbeat = HeartbeatConfig::from_context(&context);

        let mut tasks = self.tasks.lock();

        let heartbeat_rx = heartbeat.map(|config| {
            let (event_tx, event_rx) = mpsc::channel(8);
            let manager = HeartbeatManager::new(
                config,
                Arc::clone(&self.inner.heartbeat),
                event_tx,
                self.inner.cancel.child_token(),
            );
            tasks.push(runtime.spawn(manager.run()));
            event_rx
        });

        tasks.push(runtime.spawn(Arc::clone(&self.inner).run_reader(reader_rx)));
        tasks.push(runtime.spawn(Arc::clone(&self.inner).run_processor()));
        tasks.push(runtime.spawn(Arc::clone(&self.inner).run_connection_loop(
            LoopChannels {
                reader_tx,
                reply_rx,
                heartbeat_rx,
            },
        )));

        tracing::info!(
            venue = %self.inner.venue,
            url = %context.url,
            heartbeat = heartbeat.is_some(),
            "Connection engine initialized"
        );
        Ok(())
    }

    /// Write a text frame.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless the state is `Connected`, or `Send`
    /// if the write fails.
    pub async fn send(&self, message: impl Into<String>) -> Result<(), EngineError> {
        let state = self.inner.state();
        if !state.is_connected() {
            return Err(EngineError::NotConnected(state));
        }
        self.inner.write_text(message.into()).await?;
        Ok(())
    }

    /// Add a subscription and send it now if connected.
    ///
    /// The message is kept verbatim and replayed after every reconnect.
    /// Adding a message that is already active only resends it.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after `close`, or `Send` if the immediate write
    /// fails (the subscription stays active and is replayed on reconnect).
    pub async fn subscribe(&self, message: impl Into<String>) -> Result<(), EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let message = message.into();
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            if !subscriptions.contains(&message) {
                subscriptions.push(message.clone());
            }
        }
        if self.inner.state().is_connected() {
            self.inner.write_text(message).await?;
        }
        Ok(())
    }

    /// Drop `subscription` from the replay list and, if connected, send the
    /// venue's unsubscribe `request`.
    ///
    /// # Errors
    ///
    /// Returns `Send` if the unsubscribe write fails.
    pub async fn unsubscribe(
        &self,
        subscription: &str,
        request: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.inner
            .subscriptions
            .lock()
            .retain(|active| active != subscription);
        if self.inner.state().is_connected() {
            self.inner.write_text(request.into()).await?;
        }
        Ok(())
    }

    /// Active subscription messages, in send order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().clone()
    }

    /// Stop everything and wait for the tasks to finish.
    ///
    /// Safe from any state and idempotent. Queued messages are discarded
    /// and no callback runs after this returns.
    pub async fn close(&self) {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        let discarded = self.inner.queue.close();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::error!(venue = %self.inner.venue, error = %e, "Engine task panicked");
            }
        }

        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
        self.inner.heartbeat.deactivate();

        if first {
            self.inner
                .transition(ConnectionState::Disconnected, None, None);
            tracing::info!(venue = %self.inner.venue, discarded, "Connection engine closed");
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Authentication progress of the current connection.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        *self.inner.auth_state.lock()
    }

    /// Processing queue statistics.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Handler processing statistics.
    #[must_use]
    pub fn performance_metrics(&self) -> PerformanceSnapshot {
        self.inner.handler.performance_metrics()
    }

    /// The handler this engine feeds.
    #[must_use]
    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }

    /// Venue of this connection.
    #[must_use]
    pub fn venue(&self) -> Venue {
        self.inner.venue
    }

    /// Observe state transitions, including the terminal `Disconnected`.
    pub fn on_state_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.state_callbacks.register(callback)
    }

    /// Remove a state callback.
    pub fn remove_state_callback(&self, id: CallbackId) -> bool {
        self.inner.state_callbacks.unregister(id)
    }
}

// =============================================================================
// Shared State
// =============================================================================

impl<H: MessageHandler> EngineInner<H> {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(
        &self,
        state: ConnectionState,
        category: Option<ErrorCategory>,
        reason: Option<String>,
    ) {
        let previous = ConnectionState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if previous == state && category.is_none() {
            return;
        }
        metrics::set_connection_state(self.venue, state);
        tracing::debug!(venue = %self.venue, from = %previous, to = %state, "State transition");

        self.state_callbacks.dispatch(&StateChange {
            venue: self.venue,
            state,
            category,
            reason,
        });
    }

    async fn write_text(&self, text: String) -> Result<(), ConnectionFailure> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| ConnectionFailure::Other("socket not open".to_string()))?;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Write unless another write holds the socket. `None` when busy.
    async fn write_text_if_idle(&self, text: String) -> Option<Result<(), ConnectionFailure>> {
        let Ok(mut writer) = self.writer.try_lock() else {
            return None;
        };
        let Some(sink) = writer.as_mut() else {
            return Some(Err(ConnectionFailure::Other("socket not open".to_string())));
        };
        Some(
            sink.send(Message::Text(text.into()))
                .await
                .map_err(ConnectionFailure::from),
        )
    }

    async fn write_ping(&self) -> Result<(), ConnectionFailure> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| ConnectionFailure::Other("socket not open".to_string()))?;
        sink.send(Message::Ping(Bytes::new())).await?;
        Ok(())
    }

    // =========================================================================
    // Connection Loop
    // =========================================================================

    async fn run_connection_loop(self: Arc<Self>, mut channels: LoopChannels) {
        let reconnection = self.connection_policy.get_reconnection_policy();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let (established, failure) = match self.run_session(&mut channels).await {
                SessionEnd::Cancelled => return,
                SessionEnd::Failed {
                    established,
                    failure,
                } => (established, failure),
            };
            if self.cancel.is_cancelled() {
                return;
            }
            if established {
                attempt = 0;
            }

            let category = self.connection_policy.classify_error(&failure);
            self.transition(
                ConnectionState::Error,
                Some(category),
                Some(failure.to_string()),
            );

            if !self.connection_policy.should_reconnect(&failure)
                || !reconnection.allows_attempt(attempt)
            {
                tracing::error!(
                    venue = %self.venue,
                    category = %category,
                    attempt,
                    error = %failure,
                    "Giving up on connection"
                );
                self.transition(
                    ConnectionState::Disconnected,
                    Some(category),
                    Some(failure.to_string()),
                );
                return;
            }

            let delay = reconnection.apply_jitter(reconnection.next_delay(attempt, category));
            attempt = attempt.saturating_add(1);
            metrics::record_reconnect(self.venue, category);
            tracing::warn!(
                venue = %self.venue,
                category = %category,
                attempt,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Connection lost, reconnecting"
            );
            self.transition(ConnectionState::Reconnecting, None, None);

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_session(&self, channels: &mut LoopChannels) -> SessionEnd {
        self.transition(ConnectionState::Connecting, None, None);

        let connection = self.cancel.child_token();
        let mut established = false;
        let outcome = self
            .session_body(channels, &connection, &mut established)
            .await;

        self.teardown(&connection).await;

        match outcome {
            Ok(()) => SessionEnd::Cancelled,
            Err(failure) => SessionEnd::Failed {
                established,
                failure,
            },
        }
    }

    async fn session_body(
        &self,
        channels: &mut LoopChannels,
        connection: &CancellationToken,
        established: &mut bool,
    ) -> Result<(), ConnectionFailure> {
        let context = self.connection_policy.create_connection_context();
        let attempt_id = Uuid::new_v4();
        tracing::info!(venue = %self.venue, url = %context.url, %attempt_id, "Connecting");

        let request = build_request(&context.url, &context.headers)?;
        let mut ws_config = WebSocketConfig::default();
        if let Some(max_frame_size) = context.max_frame_size {
            ws_config = ws_config.max_frame_size(Some(max_frame_size));
        }
        if context.compression {
            tracing::debug!(venue = %self.venue, "Per-message compression not negotiated by transport");
        }

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_with_config(request, Some(ws_config), true),
        );
        let (stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| ConnectionFailure::ConnectTimeout)??,
        };

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.handler.on_connection_reset();
        self.heartbeat.activate();

        let (done_tx, mut done_rx) = oneshot::channel();
        channels
            .reader_tx
            .send(ReaderJob {
                source,
                cancel: connection.clone(),
                done: done_tx,
            })
            .await
            .map_err(|_| ConnectionFailure::Other("reader task stopped".to_string()))?;

        self.transition(ConnectionState::Connected, None, None);
        tracing::info!(venue = %self.venue, %attempt_id, "WebSocket connected");

        let requires_auth = self.auth_policy.requires_auth();
        *self.auth_state.lock() = AuthState::new(requires_auth);
        if requires_auth {
            self.transition(ConnectionState::Authenticating, None, None);
            match self.authenticate(channels, &mut done_rx).await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(failure) => return Err(failure),
            }
            tracing::info!(venue = %self.venue, "Authenticated");
            self.transition(ConnectionState::Connected, None, None);
        }

        let replay = self.subscriptions.lock().clone();
        for message in replay {
            self.write_text(message).await?;
        }
        *established = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                end = &mut done_rx => {
                    return Err(end.unwrap_or(ConnectionFailure::StreamEnded));
                }
                Some(reply) = channels.reply_rx.recv() => {
                    if let Err(e) = self.write_text(reply).await {
                        tracing::warn!(venue = %self.venue, error = %e, "Failed to send protocol reply");
                    }
                }
                Some(event) = recv_or_pending(&mut channels.heartbeat_rx) => match event {
                    HeartbeatEvent::Beat => self.beat().await,
                    HeartbeatEvent::Timeout => return Err(ConnectionFailure::HeartbeatTimeout),
                },
            }
        }
    }

    /// Run the handshake while still watching the socket.
    ///
    /// A reader failure or heartbeat timeout during the handshake ends the
    /// session with that failure, not an auth failure. Protocol replies go
    /// out when the socket is free and are held back otherwise. Returns
    /// `Ok(false)` on cancellation.
    async fn authenticate(
        &self,
        channels: &mut LoopChannels,
        done_rx: &mut oneshot::Receiver<ConnectionFailure>,
    ) -> Result<bool, ConnectionFailure> {
        let timeout = self.auth_policy.auth_timeout();
        let deadline = Instant::now() + timeout + AUTH_DEADLINE_GRACE;
        self.auth_state.lock().begin(deadline);

        let writer = SocketWriter { inner: self };
        let handshake = self.auth_policy.perform_handshake(&writer);
        tokio::pin!(handshake);
        let expiry = tokio::time::sleep_until(deadline.into());
        tokio::pin!(expiry);

        let mut held_replies = Vec::new();
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(false),
                result = &mut handshake => {
                    result?;
                    break;
                }
                end = &mut *done_rx => {
                    return Err(end.unwrap_or(ConnectionFailure::StreamEnded));
                }
                () = &mut expiry => {
                    return Err(AuthError::Timeout(timeout).into());
                }
                Some(reply) = channels.reply_rx.recv() => {
                    match self.write_text_if_idle(reply.clone()).await {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            tracing::warn!(venue = %self.venue, error = %e, "Failed to send protocol reply");
                        }
                        None => held_replies.push(reply),
                    }
                }
                Some(event) = recv_or_pending(&mut channels.heartbeat_rx) => match event {
                    HeartbeatEvent::Beat => self.beat_if_idle().await,
                    HeartbeatEvent::Timeout => return Err(ConnectionFailure::HeartbeatTimeout),
                },
            }
        }

        self.auth_state.lock().complete();
        for reply in held_replies {
            if let Err(e) = self.write_text(reply).await {
                tracing::warn!(venue = %self.venue, error = %e, "Failed to send protocol reply");
            }
        }
        Ok(true)
    }

    async fn beat(&self) {
        let result = match self.connection_policy.heartbeat_action() {
            HeartbeatAction::PingFrame => self.write_ping().await,
            HeartbeatAction::Text(text) => self.write_text(text).await,
        };
        match result {
            Ok(()) => self.heartbeat.mark_sent(),
            Err(e) => tracing::warn!(venue = %self.venue, error = %e, "Heartbeat send failed"),
        }
    }

    /// Beat unless the handshake is mid-write; the next tick retries.
    async fn beat_if_idle(&self) {
        let result = match self.connection_policy.heartbeat_action() {
            HeartbeatAction::Text(text) => self.write_text_if_idle(text).await,
            HeartbeatAction::PingFrame => match self.writer.try_lock() {
                Ok(mut writer) => match writer.as_mut() {
                    Some(sink) => Some(
                        sink.send(Message::Ping(Bytes::new()))
                            .await
                            .map_err(ConnectionFailure::from),
                    ),
                    None => None,
                },
                Err(_) => None,
            },
        };
        match result {
            Some(Ok(())) => self.heartbeat.mark_sent(),
            Some(Err(e)) => tracing::warn!(venue = %self.venue, error = %e, "Heartbeat send failed"),
            None => tracing::debug!(venue = %self.venue, "Socket busy, heartbeat skipped"),
        }
    }

    async fn teardown(&self, connection: &CancellationToken) {
        self.heartbeat.deactivate();
        connection.cancel();
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }

    // =========================================================================
    // Reader
    // =========================================================================

    async fn run_reader(self: Arc<Self>, mut jobs: mpsc::Receiver<ReaderJob>) {
        loop {
            let job = tokio::select! {
                () = self.cancel.cancelled() => return,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => return,
                },
            };

            if let Some(failure) = self.read_until_closed(job.source, &job.cancel).await {
                tracing::debug!(venue = %self.venue, error = %failure, "Reader stopped");
                let _ = job.done.send(failure);
            }
        }
    }

    async fn read_until_closed(
        &self,
        mut source: WsSource,
        cancel: &CancellationToken,
    ) -> Option<ConnectionFailure> {
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return None,
                frame = source.next() => frame,
            };
            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Some(ConnectionFailure::from(e)),
                None => return Some(ConnectionFailure::StreamEnded),
            };
            self.heartbeat.record_inbound();

            let payload = match message {
                Message::Text(text) => RawPayload::Text(text),
                Message::Binary(data) => RawPayload::Binary(data),
                Message::Close(frame) => {
                    return Some(ConnectionFailure::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            self.enqueue(payload);
        }
    }

    fn enqueue(&self, payload: RawPayload) {
        if self.queue.push(QueueEntry::new(payload)) == PushOutcome::DroppedOldest {
            metrics::record_queue_dropped(self.venue);
            let stats = self.queue.stats();
            if stats.dropped == 1 || stats.dropped % DROP_LOG_EVERY == 0 {
                tracing::warn!(
                    venue = %self.venue,
                    dropped = stats.dropped,
                    capacity = stats.capacity,
                    "Processing queue full, dropping oldest message"
                );
            }
        }
    }

    // =========================================================================
    // Processor
    // =========================================================================

    async fn run_processor(self: Arc<Self>) {
        while let Some(entry) = self.queue.pop().await {
            if self.cancel.is_cancelled() {
                break;
            }
            metrics::record_queue_wait(self.venue, entry.enqueue_timestamp.elapsed());

            let handled = catch_unwind(AssertUnwindSafe(|| {
                self.handler.handle(&entry.raw_payload);
            }));
            if handled.is_err() {
                self.handler.metrics().record_error(None);
                tracing::error!(
                    venue = %self.venue,
                    payload_kind = entry.raw_payload.kind(),
                    payload_len = entry.raw_payload.len(),
                    "Message handler panicked"
                );
            }
        }
        tracing::debug!(venue = %self.venue, "Processor stopped");
    }
}

enum SessionEnd {
    Cancelled,
    Failed {
        established: bool,
        failure: ConnectionFailure,
    },
}

/// Write path for the auth handshake, usable while `Authenticating`.
struct SocketWriter<'a, H> {
    inner: &'a EngineInner<H>,
}

#[async_trait]
impl<H: MessageHandler> WireSender for SocketWriter<'_, H> {
    async fn send_text(&self, text: String) -> Result<(), ConnectionFailure> {
        self.inner.write_text(text).await
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn build_request(url: &str, headers: &[(String, String)]) -> Result<Request, ConnectionFailure> {
    let mut request = url.into_client_request()?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConnectionFailure::Protocol(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConnectionFailure::Protocol(format!("invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_only_configured_headers() {
        let request = build_request("wss://stream.example.test/ws", &[]).unwrap();
        assert!(request.headers().get("x-api-key").is_none());

        let request = build_request(
            "wss://stream.example.test/ws",
            &[("X-Api-Key".to_string(), "abc".to_string())],
        )
        .unwrap();
        assert_eq!(request.headers().get("x-api-key").unwrap(), "abc");
    }

    #[test]
    fn invalid_url_is_protocol_failure() {
        let err = build_request("not a url", &[]).unwrap_err();
        assert!(err.default_category().is_terminal());
    }

    #[test]
    fn terminal_state_change() {
        let change = StateChange {
            venue: Venue::Bybit,
            state: ConnectionState::Disconnected,
            category: Some(ErrorCategory::AuthFailure),
            reason: None,
        };
        assert!(change.is_terminal());

        let change = StateChange {
            category: None,
            ..change
        };
        assert!(!change.is_terminal());
    }
}

//! Private (trading stream) message handler.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MessageHandler, ReplySink, ReplySlot, run_pipeline};
use crate::application::ports::{AuthReply, MessageClassifier, ParseError, PrivateParser};
use crate::application::services::auth_signal::AuthSignal;
use crate::application::services::callbacks::{CallbackId, CallbackRegistry};
use crate::application::services::performance::PerformanceMetrics;
use crate::domain::{
    BalanceUpdate, ExecutionReport, OrderUpdate, PositionUpdate, RawPayload, WebSocketMessageType,
};

/// Trading messages held back while authentication is pending.
pub const DEFAULT_PENDING_CAPACITY: usize = 256;

/// Routes order, position, balance and execution payloads behind an
/// authentication gate.
///
/// Trading payloads that arrive before the venue confirms the handshake are
/// parked in a small bounded buffer and replayed, in order, once the
/// confirmation comes through this same handler.
pub struct PrivateMessageHandler<C, P> {
    classifier: C,
    parser: P,
    auth: Arc<AuthSignal>,
    pending: Mutex<VecDeque<RawPayload>>,
    pending_capacity: usize,
    order_updates: CallbackRegistry<OrderUpdate>,
    positions: CallbackRegistry<PositionUpdate>,
    balances: CallbackRegistry<BalanceUpdate>,
    executions: CallbackRegistry<ExecutionReport>,
    exchange_errors: CallbackRegistry<String>,
    metrics: PerformanceMetrics,
    replies: ReplySlot,
}

impl<C, P> PrivateMessageHandler<C, P>
where
    C: MessageClassifier,
    P: PrivateParser,
{
    /// Compose a handler. `auth` must be the same signal the stream's
    /// [`AuthPolicy`](crate::application::ports::AuthPolicy) waits on.
    #[must_use]
    pub fn new(classifier: C, parser: P, auth: Arc<AuthSignal>) -> Self {
        Self::with_pending_capacity(classifier, parser, auth, DEFAULT_PENDING_CAPACITY)
    }

    /// Compose a handler with a custom pre-auth buffer size.
    #[must_use]
    pub fn with_pending_capacity(
        classifier: C,
        parser: P,
        auth: Arc<AuthSignal>,
        pending_capacity: usize,
    ) -> Self {
        let metrics = PerformanceMetrics::new(parser.venue());
        Self {
            classifier,
            parser,
            auth,
            pending: Mutex::new(VecDeque::new()),
            pending_capacity,
            order_updates: CallbackRegistry::new("order_update"),
            positions: CallbackRegistry::new("position_update"),
            balances: CallbackRegistry::new("balance_update"),
            executions: CallbackRegistry::new("execution_report"),
            exchange_errors: CallbackRegistry::new("exchange_error"),
            metrics,
            replies: ReplySlot::default(),
        }
    }

    /// Whether the venue has confirmed the handshake on this connection.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_confirmed()
    }

    /// Messages currently parked behind the gate.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Subscribe to order updates.
    pub fn on_order_update<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&OrderUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.order_updates.register(callback)
    }

    /// Subscribe to position updates.
    pub fn on_position_update<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&PositionUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.positions.register(callback)
    }

    /// Subscribe to balance updates.
    pub fn on_balance_update<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&BalanceUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.balances.register(callback)
    }

    /// Subscribe to fills.
    pub fn on_execution_report<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ExecutionReport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.executions.register(callback)
    }

    /// Subscribe to venue error messages.
    pub fn on_exchange_error<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&String) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.exchange_errors.register(callback)
    }

    /// Remove a subscriber from whichever registry holds it.
    pub fn unregister(&self, id: CallbackId) -> bool {
        self.order_updates.unregister(id)
            || self.positions.unregister(id)
            || self.balances.unregister(id)
            || self.executions.unregister(id)
            || self.exchange_errors.unregister(id)
    }

    fn park(&self, payload: &RawPayload) {
        self.metrics.record_gated();
        let mut pending = self.pending.lock();
        if pending.len() >= self.pending_capacity {
            pending.pop_front();
            tracing::warn!(
                venue = %self.parser.venue(),
                capacity = self.pending_capacity,
                "Pre-auth buffer full, dropping oldest trading message"
            );
        }
        pending.push_back(payload.clone());
    }

    fn replay_pending(&self) {
        let parked: Vec<RawPayload> = self.pending.lock().drain(..).collect();
        if parked.is_empty() {
            return;
        }
        tracing::info!(
            venue = %self.parser.venue(),
            count = parked.len(),
            "Replaying trading messages received before authentication"
        );
        for payload in &parked {
            run_pipeline(&self.classifier, &self.metrics, payload, |msg_type| {
                self.route(msg_type, payload)
            });
        }
    }

    fn dispatch_private(
        &self,
        msg_type: WebSocketMessageType,
        payload: &RawPayload,
    ) -> Result<usize, ParseError> {
        let failed = match msg_type {
            WebSocketMessageType::OrderUpdate => self
                .parser
                .parse_order_updates(payload)?
                .iter()
                .map(|update| self.order_updates.dispatch(update).failed)
                .sum(),
            WebSocketMessageType::PositionUpdate => self
                .parser
                .parse_position_updates(payload)?
                .iter()
                .map(|update| self.positions.dispatch(update).failed)
                .sum(),
            WebSocketMessageType::BalanceUpdate => self
                .parser
                .parse_balance_updates(payload)?
                .iter()
                .map(|update| self.balances.dispatch(update).failed)
                .sum(),
            WebSocketMessageType::ExecutionReport => self
                .parser
                .parse_execution_reports(payload)?
                .iter()
                .map(|report| self.executions.dispatch(report).failed)
                .sum(),
            other => return Err(ParseError::UnexpectedType(other)),
        };
        Ok(failed)
    }

    fn route(&self, msg_type: WebSocketMessageType, payload: &RawPayload) -> Result<usize, ParseError> {
        match msg_type {
            WebSocketMessageType::AuthResponse => {
                match self.parser.parse_auth_reply(payload)? {
                    AuthReply::Accepted => {
                        tracing::info!(venue = %self.parser.venue(), "Private stream authenticated");
                        self.auth.confirm();
                        self.replay_pending();
                    }
                    AuthReply::Rejected(reason) => {
                        tracing::error!(venue = %self.parser.venue(), reason = %reason, "Authentication rejected");
                        self.auth.reject(reason);
                    }
                }
                Ok(0)
            }
            msg_type if msg_type.is_private() => {
                if self.is_authenticated() {
                    self.dispatch_private(msg_type, payload)
                } else {
                    self.park(payload);
                    Ok(0)
                }
            }
            WebSocketMessageType::Ping
            | WebSocketMessageType::Pong
            | WebSocketMessageType::SubscribeAck => Ok(0),
            WebSocketMessageType::ExchangeError => {
                let reason = self.parser.exchange_error_reason(payload);
                tracing::warn!(venue = %self.parser.venue(), reason = %reason, "Exchange error");
                Ok(self.exchange_errors.dispatch(&reason).failed)
            }
            WebSocketMessageType::Unknown => Err(ParseError::Unrecognized),
            other => Err(ParseError::UnexpectedType(other)),
        }
    }
}

impl<C, P> MessageHandler for PrivateMessageHandler<C, P>
where
    C: MessageClassifier + 'static,
    P: PrivateParser + 'static,
{
    fn handle(&self, payload: &RawPayload) {
        run_pipeline(&self.classifier, &self.metrics, payload, |msg_type| {
            self.route(msg_type, payload)
        });
    }

    fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    fn attach_reply_sink(&self, sink: ReplySink) {
        self.replies.attach(sink);
    }

    fn on_connection_reset(&self) {
        self.auth.reset();
        let discarded = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded parked messages from previous connection");
        }
    }
}

//! Public (market data) message handler.

use super::{MessageHandler, ReplySink, ReplySlot, run_pipeline};
use crate::application::ports::{MessageClassifier, ParseError, PublicParser};
use crate::application::services::callbacks::{CallbackId, CallbackRegistry};
use crate::application::services::performance::PerformanceMetrics;
use crate::application::services::pool::LevelPool;
use crate::domain::{OrderBook, RawPayload, Ticker, Trade, WebSocketMessageType};

/// Routes orderbook, trade, ticker, ping, subscribe-ack and exchange-error
/// payloads.
///
/// Owns callback registration and performance bookkeeping, so every venue
/// gets the same observability. Orderbook level buffers come from an
/// internal pool and are reclaimed after all callbacks have returned.
pub struct PublicMessageHandler<C, P> {
    classifier: C,
    parser: P,
    pool: LevelPool,
    orderbooks: CallbackRegistry<OrderBook>,
    trades: CallbackRegistry<Trade>,
    tickers: CallbackRegistry<Ticker>,
    exchange_errors: CallbackRegistry<String>,
    metrics: PerformanceMetrics,
    replies: ReplySlot,
}

impl<C, P> PublicMessageHandler<C, P>
where
    C: MessageClassifier,
    P: PublicParser,
{
    /// Compose a handler from a venue classifier and parser.
    #[must_use]
    pub fn new(classifier: C, parser: P) -> Self {
        let metrics = PerformanceMetrics::new(parser.venue());
        Self {
            classifier,
            parser,
            pool: LevelPool::default(),
            orderbooks: CallbackRegistry::new("orderbook"),
            trades: CallbackRegistry::new("trade"),
            tickers: CallbackRegistry::new("ticker"),
            exchange_errors: CallbackRegistry::new("exchange_error"),
            metrics,
            replies: ReplySlot::default(),
        }
    }

    /// Subscribe to orderbook snapshots and diffs.
    pub fn on_orderbook<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&OrderBook) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.orderbooks.register(callback)
    }

    /// Subscribe to trade prints.
    pub fn on_trade<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Trade) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.trades.register(callback)
    }

    /// Subscribe to tickers.
    pub fn on_ticker<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Ticker) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.tickers.register(callback)
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
        self.orderbooks.unregister(id)
            || self.trades.unregister(id)
            || self.tickers.unregister(id)
            || self.exchange_errors.unregister(id)
    }

    /// Level buffer pool, exposed for diagnostics.
    #[must_use]
    pub const fn pool(&self) -> &LevelPool {
        &self.pool
    }

    fn route(&self, msg_type: WebSocketMessageType, payload: &RawPayload) -> Result<usize, ParseError> {
        match msg_type {
            WebSocketMessageType::Orderbook => {
                let Some(book) = self.parser.parse_orderbook(payload, &self.pool)? else {
                    return Ok(0);
                };
                let outcome = self.orderbooks.dispatch(&book);
                let OrderBook { bids, asks, .. } = book;
                self.pool.release(bids);
                self.pool.release(asks);
                Ok(outcome.failed)
            }
            WebSocketMessageType::Trade => {
                let trades = self.parser.parse_trades(payload)?;
                Ok(trades
                    .iter()
                    .map(|trade| self.trades.dispatch(trade).failed)
                    .sum())
            }
            WebSocketMessageType::Ticker => Ok(self
                .parser
                .parse_ticker(payload)?
                .map_or(0, |ticker| self.tickers.dispatch(&ticker).failed)),
            WebSocketMessageType::Ping => {
                if let Some(reply) = self.parser.ping_reply(payload) {
                    self.replies.send(reply);
                }
                Ok(0)
            }
            WebSocketMessageType::Pong => Ok(0),
            WebSocketMessageType::SubscribeAck => {
                tracing::debug!(venue = %self.parser.venue(), "Subscription acknowledged");
                Ok(0)
            }
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

impl<C, P> MessageHandler for PublicMessageHandler<C, P>
where
    C: MessageClassifier + 'static,
    P: PublicParser + 'static,
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
}

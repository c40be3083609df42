//! Domain Events
//!
//! Immutable value types produced by venue parsers and handed to
//! subscribers. These are codec-agnostic: every venue maps its wire format
//! onto the same shapes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::venue::Venue;

// =============================================================================
// Shared Enums
// =============================================================================

/// Aggressor or order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy / bid.
    Buy,
    /// Sell / ask.
    Sell,
}

/// Normalized order status across venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted, resting.
    New,
    /// Partially executed, still working.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Canceled by user or venue.
    Canceled,
    /// Rejected by venue.
    Rejected,
    /// Expired by time-in-force.
    Expired,
    /// Any status the venue adds that we do not model.
    Other,
}

// =============================================================================
// Market Data Events
// =============================================================================

/// A single orderbook price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting quantity. Zero in a diff means the level was removed.
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a price level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Orderbook snapshot or incremental diff.
///
/// Level vectors are usually backed by pooled buffers; subscribers that want
/// to keep a book beyond their callback must clone it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    /// Source venue.
    pub venue: Venue,
    /// Venue symbol (e.g., `BTCUSDT`, `KRW-BTC`).
    pub symbol: String,
    /// Bid levels in venue order (best first for snapshots).
    pub bids: Vec<PriceLevel>,
    /// Ask levels in venue order (best first for snapshots).
    pub asks: Vec<PriceLevel>,
    /// Venue sequence / update id, when the protocol provides one.
    pub sequence: Option<u64>,
    /// `true` for a full snapshot, `false` for a diff.
    pub is_snapshot: bool,
    /// Venue event time.
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Best bid price, assuming best-first ordering.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    /// Best ask price, assuming best-first ordering.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }

    /// Whether the update carries no levels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Source venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Venue trade identifier.
    pub trade_id: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Aggressor side.
    pub side: Side,
    /// Venue trade time.
    pub timestamp: DateTime<Utc>,
}

/// Top-of-book / 24h ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Source venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Best bid price.
    pub bid_price: Option<Decimal>,
    /// Best bid quantity.
    pub bid_quantity: Option<Decimal>,
    /// Best ask price.
    pub ask_price: Option<Decimal>,
    /// Best ask quantity.
    pub ask_quantity: Option<Decimal>,
    /// Last traded price.
    pub last_price: Option<Decimal>,
    /// Venue event time.
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Mid price when both sides are present.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bid_price, self.ask_price) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

// =============================================================================
// Trading Events
// =============================================================================

/// Order lifecycle update from a private stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Source venue.
    pub venue: Venue,
    /// Venue order id.
    pub order_id: String,
    /// Client order id, if one was supplied.
    pub client_order_id: Option<String>,
    /// Venue symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Normalized status.
    pub status: OrderStatus,
    /// Limit price, `None` for market orders.
    pub price: Option<Decimal>,
    /// Original quantity.
    pub quantity: Decimal,
    /// Cumulative executed quantity.
    pub filled_quantity: Decimal,
    /// Average execution price.
    pub average_price: Option<Decimal>,
    /// Venue update time.
    pub timestamp: DateTime<Utc>,
}

/// Position change from a derivatives private stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Source venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Position direction; `None` when flat.
    pub side: Option<Side>,
    /// Absolute position size.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Option<Decimal>,
    /// Mark price at update time.
    pub mark_price: Option<Decimal>,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Option<Decimal>,
    /// Venue update time.
    pub timestamp: DateTime<Utc>,
}

/// Wallet balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Source venue.
    pub venue: Venue,
    /// Asset code (e.g., `USDT`).
    pub asset: String,
    /// Total balance.
    pub total: Decimal,
    /// Balance available for new orders.
    pub available: Decimal,
    /// Venue update time.
    pub timestamp: DateTime<Utc>,
}

/// Individual fill on one of our orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Source venue.
    pub venue: Venue,
    /// Venue order id.
    pub order_id: String,
    /// Venue execution id.
    pub execution_id: String,
    /// Venue symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Fill price.
    pub price: Decimal,
    /// Fill quantity.
    pub quantity: Decimal,
    /// Fee charged for this fill.
    pub fee: Option<Decimal>,
    /// Whether we provided liquidity.
    pub is_maker: bool,
    /// Venue execution time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBook {
        OrderBook {
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            bids,
            asks,
            sequence: Some(1),
            is_snapshot: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn best_levels() {
        let ob = book(
            vec![PriceLevel::new(dec!(100.5), dec!(1))],
            vec![PriceLevel::new(dec!(100.6), dec!(2))],
        );
        assert_eq!(ob.best_bid(), Some(dec!(100.5)));
        assert_eq!(ob.best_ask(), Some(dec!(100.6)));
        assert!(!ob.is_empty());
    }

    #[test]
    fn empty_book() {
        let ob = book(vec![], vec![]);
        assert!(ob.is_empty());
        assert_eq!(ob.best_bid(), None);
    }

    #[test]
    fn ticker_mid_price() {
        let ticker = Ticker {
            venue: Venue::Bybit,
            symbol: "BTCUSDT".to_string(),
            bid_price: Some(dec!(100)),
            bid_quantity: None,
            ask_price: Some(dec!(102)),
            ask_quantity: None,
            last_price: None,
            timestamp: Utc::now(),
        };
        assert_eq!(ticker.mid_price(), Some(dec!(101)));
    }
}

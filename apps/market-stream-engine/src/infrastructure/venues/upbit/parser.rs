//! Upbit classifier and parser.
//!
//! Payloads are UTF-8 JSON even though they arrive as binary frames.
//! Prices and sizes are bare JSON numbers and are read from the raw text
//! so they never pass through `f64`.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::application::ports::{MessageClassifier, ParseError, PublicParser};
use crate::application::services::LevelPool;
use crate::domain::{
    OrderBook, PriceLevel, RawPayload, Ticker, Trade, Venue, WebSocketMessageType,
};
use crate::infrastructure::venues::decode::{decimal_number, side, timestamp_ms};
use crate::infrastructure::venues::peek;

// =============================================================================
// Classifier
// =============================================================================

/// Checks for a JSON object, then peeks at `type`, `status` and `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpbitClassifier;

impl MessageClassifier for UpbitClassifier {
    fn classify(&self, payload: &RawPayload) -> WebSocketMessageType {
        let buf = payload.as_bytes();
        if peek::first_byte(buf) != Some(b'{') {
            return WebSocketMessageType::Unknown;
        }
        match peek::str_field(buf, "type") {
            Some(b"orderbook") => return WebSocketMessageType::Orderbook,
            Some(b"trade") => return WebSocketMessageType::Trade,
            Some(b"ticker") => return WebSocketMessageType::Ticker,
            Some(_) => return WebSocketMessageType::Unknown,
            None => {}
        }
        if peek::has_key(buf, "status") {
            WebSocketMessageType::Pong
        } else if peek::has_key(buf, "error") {
            WebSocketMessageType::ExchangeError
        } else {
            WebSocketMessageType::Unknown
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Deserialize)]
struct OrderbookMsg<'a> {
    #[serde(borrow)]
    code: &'a str,
    timestamp: i64,
    #[serde(borrow, default)]
    orderbook_units: Vec<Unit<'a>>,
}

#[derive(Deserialize)]
struct Unit<'a> {
    #[serde(borrow)]
    ask_price: &'a RawValue,
    #[serde(borrow)]
    bid_price: &'a RawValue,
    #[serde(borrow)]
    ask_size: &'a RawValue,
    #[serde(borrow)]
    bid_size: &'a RawValue,
}

#[derive(Deserialize)]
struct TradeMsg<'a> {
    #[serde(borrow)]
    code: &'a str,
    #[serde(borrow)]
    trade_price: &'a RawValue,
    #[serde(borrow)]
    trade_volume: &'a RawValue,
    #[serde(borrow)]
    ask_bid: &'a str,
    sequential_id: u64,
    trade_timestamp: i64,
}

#[derive(Deserialize)]
struct TickerMsg<'a> {
    #[serde(borrow)]
    code: &'a str,
    #[serde(borrow)]
    trade_price: &'a RawValue,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ErrorMsg {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    name: String,
    #[serde(default)]
    message: String,
}

fn utf8(payload: &RawPayload) -> Result<&str, ParseError> {
    std::str::from_utf8(payload.as_bytes())
        .map_err(|_| ParseError::UnsupportedEncoding("non-utf8 frame"))
}

// =============================================================================
// Parser
// =============================================================================

/// Decodes Upbit public stream payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpbitParser;

impl UpbitParser {
    fn fill_levels(
        units: &[Unit<'_>],
        bids: &mut Vec<PriceLevel>,
        asks: &mut Vec<PriceLevel>,
    ) -> Result<(), ParseError> {
        bids.reserve(units.len());
        asks.reserve(units.len());
        for unit in units {
            bids.push(PriceLevel::new(
                decimal_number("bid_price", unit.bid_price)?,
                decimal_number("bid_size", unit.bid_size)?,
            ));
            asks.push(PriceLevel::new(
                decimal_number("ask_price", unit.ask_price)?,
                decimal_number("ask_size", unit.ask_size)?,
            ));
        }
        Ok(())
    }
}

impl PublicParser for UpbitParser {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    fn parse_orderbook(
        &self,
        payload: &RawPayload,
        pool: &LevelPool,
    ) -> Result<Option<OrderBook>, ParseError> {
        let msg: OrderbookMsg<'_> = serde_json::from_str(utf8(payload)?)?;
        if msg.orderbook_units.is_empty() {
            return Ok(None);
        }

        let mut bids = pool.acquire();
        let mut asks = pool.acquire();
        if let Err(e) = Self::fill_levels(&msg.orderbook_units, &mut bids, &mut asks) {
            pool.release(bids);
            pool.release(asks);
            return Err(e);
        }

        // Every frame carries the full visible book, snapshot or realtime.
        Ok(Some(OrderBook {
            venue: Venue::Upbit,
            symbol: msg.code.to_string(),
            bids,
            asks,
            sequence: None,
            is_snapshot: true,
            timestamp: timestamp_ms(msg.timestamp),
        }))
    }

    fn parse_trades(&self, payload: &RawPayload) -> Result<Vec<Trade>, ParseError> {
        let msg: TradeMsg<'_> = serde_json::from_str(utf8(payload)?)?;

        // `ask_bid` is the taker side.
        Ok(vec![Trade {
            venue: Venue::Upbit,
            symbol: msg.code.to_string(),
            trade_id: msg.sequential_id.to_string(),
            price: decimal_number("trade_price", msg.trade_price)?,
            quantity: decimal_number("trade_volume", msg.trade_volume)?,
            side: side("ask_bid", msg.ask_bid)?,
            timestamp: timestamp_ms(msg.trade_timestamp),
        }])
    }

    fn parse_ticker(&self, payload: &RawPayload) -> Result<Option<Ticker>, ParseError> {
        let msg: TickerMsg<'_> = serde_json::from_str(utf8(payload)?)?;

        Ok(Some(Ticker {
            venue: Venue::Upbit,
            symbol: msg.code.to_string(),
            bid_price: None,
            bid_quantity: None,
            ask_price: None,
            ask_quantity: None,
            last_price: Some(decimal_number("trade_price", msg.trade_price)?),
            timestamp: timestamp_ms(msg.timestamp),
        }))
    }

    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        match serde_json::from_slice::<ErrorMsg>(payload.as_bytes()) {
            Ok(ErrorMsg { error }) if error.message.is_empty() => error.name,
            Ok(ErrorMsg { error }) => format!("{}: {}", error.name, error.message),
            Err(_) => String::from_utf8_lossy(payload.as_bytes()).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    const ORDERBOOK: &str = r#"{"type":"orderbook","code":"KRW-BTC","timestamp":1704867306396,"total_ask_size":7.30,"total_bid_size":1.95,"orderbook_units":[{"ask_price":62560000.0,"bid_price":62555000.0,"ask_size":0.01,"bid_size":0.23},{"ask_price":62565000,"bid_price":62550000,"ask_size":1.5E-4,"bid_size":0.005}],"stream_type":"SNAPSHOT","level":0}"#;
    const TRADE: &str = r#"{"type":"trade","code":"KRW-BTC","timestamp":1676965262177,"trade_date":"2023-02-21","trade_time":"07:41:02","trade_timestamp":1676965262139,"trade_price":31883000,"trade_volume":0.03886667,"ask_bid":"BID","prev_closing_price":31890000.0,"change":"FALL","change_price":7000.0,"sequential_id":1676965262139000,"stream_type":"REALTIME"}"#;
    const TICKER: &str = r#"{"type":"ticker","code":"KRW-BTC","opening_price":31883000,"high_price":32310000,"low_price":31855000,"trade_price":32287000,"timestamp":1676965262177,"stream_type":"REALTIME"}"#;

    fn binary(json: &str) -> RawPayload {
        RawPayload::binary(json.as_bytes().to_vec())
    }

    #[test_case(ORDERBOOK, WebSocketMessageType::Orderbook ; "orderbook")]
    #[test_case(TRADE, WebSocketMessageType::Trade ; "trade")]
    #[test_case(TICKER, WebSocketMessageType::Ticker ; "ticker")]
    #[test_case(r#"{"status":"UP"}"#, WebSocketMessageType::Pong ; "keepalive reply")]
    #[test_case(r#"{"error":{"name":"INVALID_AUTH","message":"bad token"}}"#, WebSocketMessageType::ExchangeError ; "error")]
    #[test_case(r#"{"type":"candle.1s","code":"KRW-BTC"}"#, WebSocketMessageType::Unknown ; "unhandled type")]
    #[test_case("PONG", WebSocketMessageType::Unknown ; "not json")]
    fn classifies(raw: &str, expected: WebSocketMessageType) {
        assert_eq!(UpbitClassifier.classify(&binary(raw)), expected);
    }

    #[test]
    fn orderbook_units_split_into_sides() {
        let pool = LevelPool::default();
        let book = UpbitParser
            .parse_orderbook(&binary(ORDERBOOK), &pool)
            .unwrap()
            .unwrap();

        assert_eq!(book.symbol, "KRW-BTC");
        assert!(book.is_snapshot);
        assert_eq!(
            book.bids,
            vec![
                PriceLevel::new(dec!(62555000.0), dec!(0.23)),
                PriceLevel::new(dec!(62550000), dec!(0.005)),
            ]
        );
        assert_eq!(book.asks[1].quantity, dec!(0.00015));
        assert_eq!(book.timestamp.timestamp_millis(), 1_704_867_306_396);
    }

    #[test]
    fn malformed_unit_returns_buffers() {
        let pool = LevelPool::default();
        let bad = r#"{"type":"orderbook","code":"KRW-BTC","timestamp":1,"orderbook_units":[{"ask_price":"x","bid_price":1,"ask_size":1,"bid_size":1}]}"#;
        assert!(UpbitParser.parse_orderbook(&binary(bad), &pool).is_err());
        assert_eq!(pool.stats().idle, 2);
    }

    #[test]
    fn bid_taker_is_a_buy() {
        let trades = UpbitParser.parse_trades(&binary(TRADE)).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].quantity, dec!(0.03886667));
        assert_eq!(trades[0].trade_id, "1676965262139000");
    }

    #[test]
    fn ticker_carries_last_price() {
        let ticker = UpbitParser.parse_ticker(&binary(TICKER)).unwrap().unwrap();
        assert_eq!(ticker.last_price, Some(dec!(32287000)));
        assert_eq!(ticker.mid_price(), None);
    }

    #[test]
    fn error_reason() {
        let payload = binary(r#"{"error":{"name":"INVALID_AUTH","message":"bad token"}}"#);
        assert_eq!(
            UpbitParser.exchange_error_reason(&payload),
            "INVALID_AUTH: bad token"
        );
    }
}

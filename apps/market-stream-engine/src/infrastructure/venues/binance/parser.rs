//! Binance classifier and parser.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::application::ports::{MessageClassifier, ParseError, PublicParser};
use crate::application::services::LevelPool;
use crate::domain::{
    OrderBook, RawPayload, Side, Ticker, Trade, Venue, WebSocketMessageType,
};
use crate::infrastructure::venues::decode::{decimal, decimal_opt, pooled_levels, timestamp_ms};
use crate::infrastructure::venues::peek;

// =============================================================================
// Classifier
// =============================================================================

/// Classifies by stream name, then by event type, then by envelope keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceClassifier;

impl MessageClassifier for BinanceClassifier {
    fn classify(&self, payload: &RawPayload) -> WebSocketMessageType {
        let buf = payload.as_bytes();
        if !peek::is_json(buf) {
            return WebSocketMessageType::Unknown;
        }
        if let Some(stream) = peek::str_field(buf, "stream") {
            return classify_stream(stream);
        }
        if let Some(event) = peek::str_field(buf, "e") {
            return classify_event(event);
        }
        if peek::has_key(buf, "lastUpdateId") {
            WebSocketMessageType::Orderbook
        } else if peek::has_key(buf, "result") {
            WebSocketMessageType::SubscribeAck
        } else if peek::has_key(buf, "error") || peek::has_key(buf, "code") {
            WebSocketMessageType::ExchangeError
        } else if peek::has_key(buf, "u") && peek::has_key(buf, "b") {
            WebSocketMessageType::Ticker
        } else {
            WebSocketMessageType::Unknown
        }
    }
}

fn classify_stream(stream: &[u8]) -> WebSocketMessageType {
    let Some(at) = stream.iter().position(|b| *b == b'@') else {
        return WebSocketMessageType::Unknown;
    };
    let channel = &stream[at + 1..];
    if channel.starts_with(b"depth") {
        WebSocketMessageType::Orderbook
    } else if channel == b"trade" || channel == b"aggTrade" {
        WebSocketMessageType::Trade
    } else if channel == b"bookTicker" || channel == b"ticker" {
        WebSocketMessageType::Ticker
    } else {
        WebSocketMessageType::Unknown
    }
}

fn classify_event(event: &[u8]) -> WebSocketMessageType {
    match event {
        b"depthUpdate" => WebSocketMessageType::Orderbook,
        b"trade" | b"aggTrade" => WebSocketMessageType::Trade,
        b"24hrTicker" => WebSocketMessageType::Ticker,
        _ => WebSocketMessageType::Unknown,
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Deserialize)]
struct Combined<'a> {
    #[serde(borrow)]
    stream: &'a str,
    #[serde(borrow)]
    data: &'a RawValue,
}

#[derive(Deserialize)]
struct DepthMsg<'a> {
    #[serde(rename = "e", borrow, default)]
    event: Option<&'a str>,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
    #[serde(rename = "s", borrow, default)]
    symbol: Option<&'a str>,
    #[serde(rename = "u", alias = "lastUpdateId", default)]
    last_update_id: Option<u64>,
    #[serde(rename = "b", alias = "bids", borrow, default)]
    bids: Option<&'a RawValue>,
    #[serde(rename = "a", alias = "asks", borrow, default)]
    asks: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct TradeMsg<'a> {
    #[serde(rename = "s", borrow)]
    symbol: &'a str,
    #[serde(rename = "t", alias = "a")]
    trade_id: u64,
    #[serde(rename = "p", borrow)]
    price: &'a str,
    #[serde(rename = "q", borrow)]
    quantity: &'a str,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Deserialize)]
struct TickerMsg<'a> {
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
    #[serde(rename = "s", borrow)]
    symbol: &'a str,
    #[serde(rename = "b", borrow)]
    bid_price: &'a str,
    #[serde(rename = "B", borrow)]
    bid_quantity: &'a str,
    #[serde(rename = "a", borrow)]
    ask_price: &'a str,
    #[serde(rename = "A", borrow)]
    ask_quantity: &'a str,
    #[serde(rename = "c", borrow, default)]
    last_price: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorMsg {
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

// =============================================================================
// Parser
// =============================================================================

/// Decodes Binance public stream payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceParser;

/// Body of a frame plus the stream name when it came through `/stream`.
fn unwrap_frame(payload: &RawPayload) -> Result<(Option<&str>, &str), ParseError> {
    let text = std::str::from_utf8(payload.as_bytes())
        .map_err(|_| ParseError::UnsupportedEncoding("non-utf8 frame"))?;
    if peek::has_key(text.as_bytes(), "stream") {
        let combined: Combined<'_> = serde_json::from_str(text)?;
        Ok((Some(combined.stream), combined.data.get()))
    } else {
        Ok((None, text))
    }
}

/// `btcusdt@depth@100ms` -> `BTCUSDT`.
fn stream_symbol(stream: &str) -> Option<String> {
    stream
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

impl PublicParser for BinanceParser {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn parse_orderbook(
        &self,
        payload: &RawPayload,
        pool: &LevelPool,
    ) -> Result<Option<OrderBook>, ParseError> {
        let (stream, body) = unwrap_frame(payload)?;
        let msg: DepthMsg<'_> = serde_json::from_str(body)?;

        let symbol = msg
            .symbol
            .map(str::to_string)
            .or_else(|| stream.and_then(stream_symbol))
            .ok_or_else(|| ParseError::invalid("s", "missing symbol"))?;

        let bids = pooled_levels(msg.bids, pool)?;
        let asks = match pooled_levels(msg.asks, pool) {
            Ok(asks) => asks,
            Err(e) => {
                pool.release(bids);
                return Err(e);
            }
        };
        if bids.is_empty() && asks.is_empty() {
            pool.release(bids);
            pool.release(asks);
            return Ok(None);
        }

        Ok(Some(OrderBook {
            venue: Venue::Binance,
            symbol,
            bids,
            asks,
            sequence: msg.last_update_id,
            is_snapshot: msg.event.is_none(),
            timestamp: msg.event_time.map_or_else(chrono::Utc::now, timestamp_ms),
        }))
    }

    fn parse_trades(&self, payload: &RawPayload) -> Result<Vec<Trade>, ParseError> {
        let (_, body) = unwrap_frame(payload)?;
        let msg: TradeMsg<'_> = serde_json::from_str(body)?;

        // Binance reports whether the buyer was the maker; the taker side
        // is the aggressor.
        let side = if msg.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        };

        Ok(vec![Trade {
            venue: Venue::Binance,
            symbol: msg.symbol.to_string(),
            trade_id: msg.trade_id.to_string(),
            price: decimal("p", msg.price)?,
            quantity: decimal("q", msg.quantity)?,
            side,
            timestamp: timestamp_ms(msg.trade_time),
        }])
    }

    fn parse_ticker(&self, payload: &RawPayload) -> Result<Option<Ticker>, ParseError> {
        let (_, body) = unwrap_frame(payload)?;
        let msg: TickerMsg<'_> = serde_json::from_str(body)?;

        Ok(Some(Ticker {
            venue: Venue::Binance,
            symbol: msg.symbol.to_string(),
            bid_price: decimal_opt("b", msg.bid_price)?,
            bid_quantity: decimal_opt("B", msg.bid_quantity)?,
            ask_price: decimal_opt("a", msg.ask_price)?,
            ask_quantity: decimal_opt("A", msg.ask_quantity)?,
            last_price: msg.last_price.map(|p| decimal_opt("c", p)).transpose()?.flatten(),
            timestamp: msg.event_time.map_or_else(chrono::Utc::now, timestamp_ms),
        }))
    }

    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        match serde_json::from_slice::<ErrorMsg>(payload.as_bytes()) {
            Ok(ErrorMsg {
                error: Some(body), ..
            }) => format!("{} ({})", body.msg, body.code),
            Ok(ErrorMsg {
                code: Some(code),
                msg: Some(msg),
                ..
            }) => format!("{msg} ({code})"),
            _ => String::from_utf8_lossy(payload.as_bytes()).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceLevel;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    const DIFF_DEPTH: &str = r#"{"stream":"bnbbtc@depth@100ms","data":{"e":"depthUpdate","E":1700000000123,"s":"BNBBTC","U":157,"u":160,"b":[["0.0024","10"]],"a":[["0.0026","100"],["0.0027","5.5"]]}}"#;
    const PARTIAL_DEPTH: &str = r#"{"stream":"ethusdt@depth5@100ms","data":{"lastUpdateId":42,"bids":[["2000.10","1.5"]],"asks":[["2000.20","0.7"]]}}"#;
    const TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000500,"s":"BTCUSDT","t":12345,"p":"37000.50","q":"0.010","T":1700000000499,"m":true,"M":true}}"#;
    const BOOK_TICKER: &str = r#"{"stream":"btcusdt@bookTicker","data":{"u":400900217,"s":"BTCUSDT","b":"37000.10","B":"1.2","a":"37000.20","A":"0.8"}}"#;

    #[test_case(DIFF_DEPTH, WebSocketMessageType::Orderbook ; "combined diff depth")]
    #[test_case(PARTIAL_DEPTH, WebSocketMessageType::Orderbook ; "combined partial depth")]
    #[test_case(TRADE, WebSocketMessageType::Trade ; "combined trade")]
    #[test_case(BOOK_TICKER, WebSocketMessageType::Ticker ; "combined book ticker")]
    #[test_case(r#"{"e":"depthUpdate","s":"BNBBTC","u":1,"b":[],"a":[]}"#, WebSocketMessageType::Orderbook ; "raw diff depth")]
    #[test_case(r#"{"e":"aggTrade","s":"BNBBTC","a":1,"p":"1","q":"1","T":1,"m":false}"#, WebSocketMessageType::Trade ; "raw agg trade")]
    #[test_case(r#"{"lastUpdateId":1,"bids":[],"asks":[]}"#, WebSocketMessageType::Orderbook ; "raw partial depth")]
    #[test_case(r#"{"u":1,"s":"BNBUSDT","b":"1","B":"1","a":"2","A":"1"}"#, WebSocketMessageType::Ticker ; "raw book ticker")]
    #[test_case(r#"{"result":null,"id":1}"#, WebSocketMessageType::SubscribeAck ; "subscribe ack")]
    #[test_case(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#, WebSocketMessageType::ExchangeError ; "error envelope")]
    #[test_case(r#"{"code":-1121,"msg":"Invalid symbol."}"#, WebSocketMessageType::ExchangeError ; "bare error")]
    #[test_case(r#"{"stream":"btcusdt@kline_1m","data":{}}"#, WebSocketMessageType::Unknown ; "unhandled stream")]
    #[test_case("not json", WebSocketMessageType::Unknown ; "garbage")]
    fn classifies(raw: &str, expected: WebSocketMessageType) {
        assert_eq!(BinanceClassifier.classify(&RawPayload::text(raw)), expected);
    }

    #[test]
    fn diff_depth_round_trips_exactly() {
        let pool = LevelPool::default();
        let book = BinanceParser
            .parse_orderbook(&RawPayload::text(DIFF_DEPTH), &pool)
            .unwrap()
            .unwrap();

        assert_eq!(book.symbol, "BNBBTC");
        assert_eq!(book.sequence, Some(160));
        assert!(!book.is_snapshot);
        assert_eq!(book.bids, vec![PriceLevel::new(dec!(0.0024), dec!(10))]);
        assert_eq!(
            book.asks,
            vec![
                PriceLevel::new(dec!(0.0026), dec!(100)),
                PriceLevel::new(dec!(0.0027), dec!(5.5)),
            ]
        );
        assert_eq!(book.timestamp.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn partial_depth_takes_symbol_from_stream() {
        let pool = LevelPool::default();
        let book = BinanceParser
            .parse_orderbook(&RawPayload::text(PARTIAL_DEPTH), &pool)
            .unwrap()
            .unwrap();

        assert_eq!(book.symbol, "ETHUSDT");
        assert_eq!(book.sequence, Some(42));
        assert!(book.is_snapshot);
        assert_eq!(book.best_bid(), Some(dec!(2000.10)));
    }

    #[test]
    fn empty_depth_is_not_actionable() {
        let pool = LevelPool::default();
        let empty = r#"{"e":"depthUpdate","E":1,"s":"BNBBTC","u":1,"b":[],"a":[]}"#;
        assert!(
            BinanceParser
                .parse_orderbook(&RawPayload::text(empty), &pool)
                .unwrap()
                .is_none()
        );
        assert_eq!(pool.stats().idle, 2);
    }

    #[test]
    fn trade_side_is_aggressor() {
        let trades = BinanceParser.parse_trades(&RawPayload::text(TRADE)).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].price, dec!(37000.50));
        assert_eq!(trades[0].trade_id, "12345");
    }

    #[test]
    fn book_ticker() {
        let ticker = BinanceParser
            .parse_ticker(&RawPayload::text(BOOK_TICKER))
            .unwrap()
            .unwrap();
        assert_eq!(ticker.bid_price, Some(dec!(37000.10)));
        assert_eq!(ticker.ask_quantity, Some(dec!(0.8)));
        assert_eq!(ticker.last_price, None);
    }

    #[test]
    fn malformed_trade_is_error() {
        let bad = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT"}}"#;
        assert!(BinanceParser.parse_trades(&RawPayload::text(bad)).is_err());
    }

    #[test]
    fn error_reason() {
        let payload = RawPayload::text(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#);
        assert_eq!(
            BinanceParser.exchange_error_reason(&payload),
            "Invalid request (2)"
        );
    }
}

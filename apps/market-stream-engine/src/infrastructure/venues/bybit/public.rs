//! Bybit public stream parser.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::application::ports::{ParseError, PublicParser};
use crate::application::services::LevelPool;
use crate::domain::{OrderBook, RawPayload, Ticker, Trade, Venue};
use crate::infrastructure::venues::decode::{
    decimal, decimal_opt, pooled_levels, side, timestamp_ms,
};

const PONG: &str = r#"{"op":"pong"}"#;

#[derive(Deserialize)]
struct Envelope<'a, T> {
    #[serde(rename = "type", borrow, default)]
    kind: Option<&'a str>,
    ts: i64,
    data: T,
}

#[derive(Deserialize)]
struct BookData<'a> {
    #[serde(rename = "s", borrow)]
    symbol: &'a str,
    #[serde(rename = "b", borrow, default)]
    bids: Option<&'a RawValue>,
    #[serde(rename = "a", borrow, default)]
    asks: Option<&'a RawValue>,
    #[serde(rename = "u", default)]
    update_id: Option<u64>,
}

#[derive(Deserialize)]
struct TradeRow<'a> {
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "s", borrow)]
    symbol: &'a str,
    #[serde(rename = "S", borrow)]
    side: &'a str,
    #[serde(rename = "v", borrow)]
    volume: &'a str,
    #[serde(rename = "p", borrow)]
    price: &'a str,
    #[serde(rename = "i", borrow)]
    trade_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData<'a> {
    #[serde(borrow)]
    symbol: &'a str,
    #[serde(borrow, default)]
    last_price: Option<&'a str>,
    #[serde(rename = "bid1Price", borrow, default)]
    bid_price: Option<&'a str>,
    #[serde(rename = "bid1Size", borrow, default)]
    bid_size: Option<&'a str>,
    #[serde(rename = "ask1Price", borrow, default)]
    ask_price: Option<&'a str>,
    #[serde(rename = "ask1Size", borrow, default)]
    ask_size: Option<&'a str>,
}

#[derive(Deserialize)]
struct ControlReply {
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    op: Option<String>,
}

pub(super) fn opt(field: &'static str, value: Option<&str>) -> Result<Option<Decimal>, ParseError> {
    value
        .map(|v| decimal_opt(field, v))
        .transpose()
        .map(Option::flatten)
}

/// Decodes Bybit public stream payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitPublicParser;

impl PublicParser for BybitPublicParser {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn parse_orderbook(
        &self,
        payload: &RawPayload,
        pool: &LevelPool,
    ) -> Result<Option<OrderBook>, ParseError> {
        let msg: Envelope<'_, BookData<'_>> = serde_json::from_slice(payload.as_bytes())?;

        let bids = pooled_levels(msg.data.bids, pool)?;
        let asks = match pooled_levels(msg.data.asks, pool) {
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
            venue: Venue::Bybit,
            symbol: msg.data.symbol.to_string(),
            bids,
            asks,
            sequence: msg.data.update_id,
            is_snapshot: msg.kind == Some("snapshot"),
            timestamp: timestamp_ms(msg.ts),
        }))
    }

    fn parse_trades(&self, payload: &RawPayload) -> Result<Vec<Trade>, ParseError> {
        let msg: Envelope<'_, Vec<TradeRow<'_>>> = serde_json::from_slice(payload.as_bytes())?;

        msg.data
            .into_iter()
            .map(|row| {
                Ok(Trade {
                    venue: Venue::Bybit,
                    symbol: row.symbol.to_string(),
                    trade_id: row.trade_id.to_string(),
                    price: decimal("p", row.price)?,
                    quantity: decimal("v", row.volume)?,
                    side: side("S", row.side)?,
                    timestamp: timestamp_ms(row.trade_time),
                })
            })
            .collect()
    }

    fn parse_ticker(&self, payload: &RawPayload) -> Result<Option<Ticker>, ParseError> {
        let msg: Envelope<'_, TickerData<'_>> = serde_json::from_slice(payload.as_bytes())?;
        let data = msg.data;

        let ticker = Ticker {
            venue: Venue::Bybit,
            symbol: data.symbol.to_string(),
            bid_price: opt("bid1Price", data.bid_price)?,
            bid_quantity: opt("bid1Size", data.bid_size)?,
            ask_price: opt("ask1Price", data.ask_price)?,
            ask_quantity: opt("ask1Size", data.ask_size)?,
            last_price: opt("lastPrice", data.last_price)?,
            timestamp: timestamp_ms(msg.ts),
        };

        // Linear deltas only carry changed fields; nothing quoted means
        // nothing to report.
        let quoted = ticker.bid_price.is_some()
            || ticker.ask_price.is_some()
            || ticker.last_price.is_some();
        Ok(quoted.then_some(ticker))
    }

    fn ping_reply(&self, _payload: &RawPayload) -> Option<String> {
        Some(PONG.to_string())
    }

    fn exchange_error_reason(&self, payload: &RawPayload) -> String {
        control_reason(payload)
    }
}

/// `ret_msg` of a control reply, with the op when present.
pub(super) fn control_reason(payload: &RawPayload) -> String {
    match serde_json::from_slice::<ControlReply>(payload.as_bytes()) {
        Ok(ControlReply {
            ret_msg,
            op: Some(op),
        }) => format!("{op}: {ret_msg}"),
        Ok(ControlReply { ret_msg, op: None }) => ret_msg,
        Err(_) => String::from_utf8_lossy(payload.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PriceLevel, Side};
    use rust_decimal_macros::dec;

    const SNAPSHOT: &str = r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1672304484978,"data":{"s":"BTCUSDT","b":[["16493.50","0.006"],["16493.00","0.100"]],"a":[["16611.00","0.029"]],"u":18521288,"seq":7961638724},"cts":1672304484976}"#;
    const DELTA: &str = r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1672304484979,"data":{"s":"BTCUSDT","b":[],"a":[["16611.00","0"]],"u":18521289,"seq":7961638725},"cts":1672304484977}"#;
    const TRADES: &str = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1672304486868,"data":[{"T":1672304486865,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","L":"PlusTick","i":"20f43950-d8dd-5b31-9112-a178eb6023af","BT":false},{"T":1672304486866,"s":"BTCUSDT","S":"Sell","v":"0.002","p":"16578.00","L":"MinusTick","i":"20f43950-d8dd-5b31-9112-a178eb6023b0","BT":false}]}"#;
    const TICKER: &str = r#"{"topic":"tickers.BTCUSDT","type":"snapshot","data":{"symbol":"BTCUSDT","lastPrice":"17216.00","bid1Price":"17215.50","bid1Size":"84.489","ask1Price":"17216.00","ask1Size":"83.020"},"cs":24987956059,"ts":1673272861686}"#;

    #[test]
    fn snapshot_round_trips_exactly() {
        let pool = LevelPool::default();
        let book = BybitPublicParser
            .parse_orderbook(&RawPayload::text(SNAPSHOT), &pool)
            .unwrap()
            .unwrap();

        assert!(book.is_snapshot);
        assert_eq!(book.sequence, Some(18_521_288));
        assert_eq!(
            book.bids,
            vec![
                PriceLevel::new(dec!(16493.50), dec!(0.006)),
                PriceLevel::new(dec!(16493.00), dec!(0.100)),
            ]
        );
        assert_eq!(book.asks[0].quantity.to_string(), "0.029");
    }

    #[test]
    fn delta_with_removal() {
        let pool = LevelPool::default();
        let book = BybitPublicParser
            .parse_orderbook(&RawPayload::text(DELTA), &pool)
            .unwrap()
            .unwrap();
        assert!(!book.is_snapshot);
        assert!(book.bids.is_empty());
        assert!(book.asks[0].quantity.is_zero());
    }

    #[test]
    fn trades_in_order() {
        let trades = BybitPublicParser
            .parse_trades(&RawPayload::text(TRADES))
            .unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].side, Side::Sell);
        assert_eq!(trades[1].price, dec!(16578.00));
    }

    #[test]
    fn ticker_levels() {
        let ticker = BybitPublicParser
            .parse_ticker(&RawPayload::text(TICKER))
            .unwrap()
            .unwrap();
        assert_eq!(ticker.mid_price(), Some(dec!(17215.75)));
        assert_eq!(ticker.last_price, Some(dec!(17216.00)));
    }

    #[test]
    fn ticker_delta_without_quotes_is_skipped() {
        let delta = r#"{"topic":"tickers.BTCUSDT","type":"delta","data":{"symbol":"BTCUSDT","openInterest":"1"},"ts":1}"#;
        assert!(
            BybitPublicParser
                .parse_ticker(&RawPayload::text(delta))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn answers_server_ping() {
        assert_eq!(
            BybitPublicParser.ping_reply(&RawPayload::text(r#"{"op":"ping"}"#)),
            Some(r#"{"op":"pong"}"#.to_string())
        );
    }

    #[test]
    fn subscribe_failure_reason() {
        let payload = RawPayload::text(
            r#"{"success":false,"ret_msg":"error:handler not found","op":"subscribe"}"#,
        );
        assert_eq!(
            BybitPublicParser.exchange_error_reason(&payload),
            "subscribe: error:handler not found"
        );
    }
}

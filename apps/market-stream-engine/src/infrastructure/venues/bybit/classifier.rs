//! Bybit message classification, shared by public and private streams.

use crate::application::ports::MessageClassifier;
use crate::domain::{RawPayload, WebSocketMessageType};
use crate::infrastructure::venues::peek;

/// Classifies by `topic` for data frames and by `op` for control frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitClassifier;

impl MessageClassifier for BybitClassifier {
    fn classify(&self, payload: &RawPayload) -> WebSocketMessageType {
        let buf = payload.as_bytes();
        if !peek::is_json(buf) {
            return WebSocketMessageType::Unknown;
        }
        if let Some(topic) = peek::str_field(buf, "topic") {
            return classify_topic(topic);
        }
        if let Some(op) = peek::str_field(buf, "op") {
            return classify_op(buf, op);
        }
        if peek::bool_field(buf, "success") == Some(false) {
            return WebSocketMessageType::ExchangeError;
        }
        WebSocketMessageType::Unknown
    }
}

/// `name` exactly, or `name.<category>`.
fn topic_is(topic: &[u8], name: &[u8]) -> bool {
    topic
        .strip_prefix(name)
        .is_some_and(|rest| rest.is_empty() || rest.first() == Some(&b'.'))
}

fn classify_topic(topic: &[u8]) -> WebSocketMessageType {
    if topic.starts_with(b"orderbook.") {
        WebSocketMessageType::Orderbook
    } else if topic.starts_with(b"publicTrade.") {
        WebSocketMessageType::Trade
    } else if topic.starts_with(b"tickers.") {
        WebSocketMessageType::Ticker
    } else if topic_is(topic, b"order") {
        WebSocketMessageType::OrderUpdate
    } else if topic_is(topic, b"execution") {
        WebSocketMessageType::ExecutionReport
    } else if topic_is(topic, b"position") {
        WebSocketMessageType::PositionUpdate
    } else if topic_is(topic, b"wallet") {
        WebSocketMessageType::BalanceUpdate
    } else {
        WebSocketMessageType::Unknown
    }
}

fn classify_op(buf: &[u8], op: &[u8]) -> WebSocketMessageType {
    match op {
        b"auth" => WebSocketMessageType::AuthResponse,
        b"pong" => WebSocketMessageType::Pong,
        b"ping" => {
            if peek::str_field(buf, "ret_msg") == Some(b"pong") {
                WebSocketMessageType::Pong
            } else {
                WebSocketMessageType::Ping
            }
        }
        b"subscribe" | b"unsubscribe" => {
            if peek::bool_field(buf, "success") == Some(false) {
                WebSocketMessageType::ExchangeError
            } else {
                WebSocketMessageType::SubscribeAck
            }
        }
        _ => WebSocketMessageType::Unknown,
    }
}

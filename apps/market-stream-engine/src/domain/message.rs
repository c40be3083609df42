//! Raw Message Types
//!
//! The unparsed payload handed from the socket reader to the processor,
//! and the logical message types a classifier can assign to it.

use std::time::Instant;

use tokio_tungstenite::tungstenite::{Bytes, Utf8Bytes};

// =============================================================================
// Message Type
// =============================================================================

/// Logical type of an inbound payload, decided by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WebSocketMessageType {
    /// Orderbook snapshot or diff.
    Orderbook,
    /// Public trade prints.
    Trade,
    /// Top-of-book / ticker.
    Ticker,
    /// Venue-initiated application-level ping that needs a reply.
    Ping,
    /// Reply to our own keepalive.
    Pong,
    /// Subscribe / unsubscribe acknowledgement.
    SubscribeAck,
    /// Reply to the signed auth handshake.
    AuthResponse,
    /// Error reported by the venue over the stream.
    ExchangeError,
    /// Private order lifecycle update.
    OrderUpdate,
    /// Private position update.
    PositionUpdate,
    /// Private wallet balance update.
    BalanceUpdate,
    /// Private fill report.
    ExecutionReport,
    /// Could not be classified.
    Unknown,
}

impl WebSocketMessageType {
    /// All variants, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Orderbook,
        Self::Trade,
        Self::Ticker,
        Self::Ping,
        Self::Pong,
        Self::SubscribeAck,
        Self::AuthResponse,
        Self::ExchangeError,
        Self::OrderUpdate,
        Self::PositionUpdate,
        Self::BalanceUpdate,
        Self::ExecutionReport,
        Self::Unknown,
    ];

    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orderbook => "orderbook",
            Self::Trade => "trade",
            Self::Ticker => "ticker",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::SubscribeAck => "subscribe_ack",
            Self::AuthResponse => "auth_response",
            Self::ExchangeError => "exchange_error",
            Self::OrderUpdate => "order_update",
            Self::PositionUpdate => "position_update",
            Self::BalanceUpdate => "balance_update",
            Self::ExecutionReport => "execution_report",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this type only appears on authenticated trading streams.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(
            self,
            Self::OrderUpdate | Self::PositionUpdate | Self::BalanceUpdate | Self::ExecutionReport
        )
    }
}

impl std::fmt::Display for WebSocketMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Raw Payload
// =============================================================================

/// Unparsed frame body. Cloning is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    /// Text frame (UTF-8 validated by the transport).
    Text(Utf8Bytes),
    /// Binary frame.
    Binary(Bytes),
}

impl RawPayload {
    /// Build a text payload.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Utf8Bytes::from(text.into()))
    }

    /// Build a binary payload.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(Bytes::from(data.into()))
    }

    /// Raw bytes regardless of frame kind.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Text view for text frames.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this came from a binary frame.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Frame kind label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

// =============================================================================
// Queue Entry
// =============================================================================

/// A payload waiting between the reader and the processor.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// The frame body.
    pub raw_payload: RawPayload,
    /// When the reader enqueued it.
    pub enqueue_timestamp: Instant,
}

impl QueueEntry {
    /// Stamp a payload with the current time.
    #[must_use]
    pub fn new(raw_payload: RawPayload) -> Self {
        Self {
            raw_payload,
            enqueue_timestamp: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_views() {
        let text = RawPayload::text(r#"{"a":1}"#);
        assert_eq!(text.as_text(), Some(r#"{"a":1}"#));
        assert_eq!(text.len(), 7);
        assert!(!text.is_binary());

        let binary = RawPayload::binary(vec![1u8, 2, 3]);
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.as_bytes(), &[1, 2, 3]);
        assert_eq!(binary.kind(), "binary");
    }

    #[test]
    fn private_types() {
        let private: Vec<_> = WebSocketMessageType::ALL
            .into_iter()
            .filter(|t| t.is_private())
            .collect();
        assert_eq!(
            private,
            vec![
                WebSocketMessageType::OrderUpdate,
                WebSocketMessageType::PositionUpdate,
                WebSocketMessageType::BalanceUpdate,
                WebSocketMessageType::ExecutionReport,
            ]
        );
    }
}

//! Binance Spot Public Streams
//!
//! Combined-stream endpoint (`/stream`) with live `SUBSCRIBE` requests.
//! Frames are JSON text wrapped as `{"stream":"<name>","data":{...}}`.
//!
//! # Streams
//!
//! - `<symbol>@depth@100ms`: diff depth
//! - `<symbol>@depth<N>@100ms`: partial book snapshots
//! - `<symbol>@trade` / `<symbol>@aggTrade`: prints
//! - `<symbol>@bookTicker`: best bid/ask
//!
//! The server pings every few minutes and tungstenite answers; the client
//! heartbeat is disabled.
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

mod parser;

pub use parser::{BinanceClassifier, BinanceParser};

use serde::Serialize;

use crate::application::ports::ConnectionPolicy;
use crate::domain::{ConnectionContext, ReconnectionPolicy, Venue};

/// Production combined-stream endpoint.
pub const PUBLIC_URL: &str = "wss://stream.binance.com:9443/stream";

/// Largest frame accepted from Binance.
const MAX_FRAME_SIZE: usize = 1 << 20;

// =============================================================================
// Connection Policy
// =============================================================================

/// Minimal-header connection with exponential backoff for every retryable
/// category.
#[derive(Debug, Clone)]
pub struct BinancePolicy {
    url: String,
    reconnection: ReconnectionPolicy,
}

impl BinancePolicy {
    /// Create a policy for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, reconnection: ReconnectionPolicy) -> Self {
        Self {
            url: url.into(),
            reconnection,
        }
    }
}

impl Default for BinancePolicy {
    fn default() -> Self {
        Self::new(PUBLIC_URL, ReconnectionPolicy::default())
    }
}

impl ConnectionPolicy for BinancePolicy {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn create_connection_context(&self) -> ConnectionContext {
        ConnectionContext::new(self.url.clone()).with_max_frame_size(MAX_FRAME_SIZE)
    }

    fn get_reconnection_policy(&self) -> ReconnectionPolicy {
        self.reconnection.clone()
    }
}

// =============================================================================
// Subscription Requests
// =============================================================================

/// Live subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

impl StreamRequest {
    /// Empty `SUBSCRIBE` request.
    #[must_use]
    pub const fn subscribe(id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: Vec::new(),
            id,
        }
    }

    /// Empty `UNSUBSCRIBE` request.
    #[must_use]
    pub const fn unsubscribe(id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params: Vec::new(),
            id,
        }
    }

    /// Add diff-depth streams.
    #[must_use]
    pub fn with_depth(mut self, symbols: &[String]) -> Self {
        self.params
            .extend(symbols.iter().map(|s| format!("{}@depth@100ms", s.to_lowercase())));
        self
    }

    /// Add trade streams.
    #[must_use]
    pub fn with_trades(mut self, symbols: &[String]) -> Self {
        self.params
            .extend(symbols.iter().map(|s| format!("{}@trade", s.to_lowercase())));
        self
    }

    /// Add best bid/ask streams.
    #[must_use]
    pub fn with_book_ticker(mut self, symbols: &[String]) -> Self {
        self.params
            .extend(symbols.iter().map(|s| format!("{}@bookTicker", s.to_lowercase())));
        self
    }

    /// Whether any stream was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionFailure, ErrorCategory};

    #[test]
    fn subscribe_request_wire_format() {
        let symbols = vec!["BTCUSDT".to_string()];
        let json = StreamRequest::subscribe(1)
            .with_depth(&symbols)
            .with_trades(&symbols)
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["btcusdt@depth@100ms","btcusdt@trade"],"id":1}"#
        );
    }

    #[test]
    fn context_is_minimal() {
        let context = BinancePolicy::default().create_connection_context();
        assert!(context.headers.is_empty());
        assert!(!context.heartbeat_enabled());
        assert!(!context.compression);
    }

    #[test]
    fn abnormal_closure_backs_off_exponentially() {
        let policy = BinancePolicy::default();
        let reconnection = policy.get_reconnection_policy();
        let category = policy.classify_error(&ConnectionFailure::StreamEnded);
        assert_eq!(category, ErrorCategory::AbnormalClosure);
        assert!(reconnection.next_delay(3, category) > reconnection.initial_delay);
    }

    #[test]
    fn handshake_rejection_is_terminal() {
        let policy = BinancePolicy::default();
        assert!(!policy.should_reconnect(&ConnectionFailure::HandshakeRejected { status: 403 }));
        assert!(policy.should_reconnect(&ConnectionFailure::HandshakeRejected { status: 429 }));
    }
}

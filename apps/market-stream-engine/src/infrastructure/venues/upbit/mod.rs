//! Upbit Public Streams
//!
//! One request frame subscribes to everything: a ticket, one object per
//! data type, and a format selector. JSON payloads arrive in binary frames.
//!
//! The endpoint rejects handshakes carrying anything beyond the required
//! WebSocket headers, so the connection context has none. Idle sockets are
//! closed after 120 seconds; a text `PING` is answered with
//! `{"status":"UP"}`. The server also drops connections with 1006 during
//! routine rebalancing, which is retried at the initial delay.
//!
//! # References
//!
//! - [WebSocket Guide](https://global-docs.upbit.com/reference/websocket-guide)

mod parser;

pub use parser::{UpbitClassifier, UpbitParser};

use std::time::Duration;

use serde::Serialize;

use crate::application::ports::ConnectionPolicy;
use crate::domain::{
    ConnectionContext, ErrorCategory, HeartbeatAction, ReconnectionPolicy, Venue,
};

/// Production endpoint.
pub const PUBLIC_URL: &str = "wss://api.upbit.com/websocket/v1";

/// Keepalive cadence, well inside the 120 s idle cutoff.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);

/// Silence tolerated after a keepalive.
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

const KEEPALIVE: &str = "PING";

// =============================================================================
// Connection Policy
// =============================================================================

/// Upbit connection parameters.
#[derive(Debug, Clone)]
pub struct UpbitPolicy {
    url: String,
    reconnection: ReconnectionPolicy,
    ping_interval: Duration,
}

impl UpbitPolicy {
    /// Create a policy for `url`; abnormal closures retry at the initial
    /// delay.
    #[must_use]
    pub fn new(url: impl Into<String>, reconnection: ReconnectionPolicy) -> Self {
        Self {
            url: url.into(),
            reconnection: reconnection.with_fast_retry(ErrorCategory::AbnormalClosure),
            ping_interval: PING_INTERVAL,
        }
    }

    /// Override the keepalive cadence.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

impl Default for UpbitPolicy {
    fn default() -> Self {
        Self::new(PUBLIC_URL, ReconnectionPolicy::default())
    }
}

impl ConnectionPolicy for UpbitPolicy {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    fn create_connection_context(&self) -> ConnectionContext {
        ConnectionContext::new(self.url.clone()).with_ping(self.ping_interval, PING_TIMEOUT)
    }

    fn get_reconnection_policy(&self) -> ReconnectionPolicy {
        self.reconnection.clone()
    }

    fn heartbeat_action(&self) -> HeartbeatAction {
        HeartbeatAction::Text(KEEPALIVE.to_string())
    }
}

// =============================================================================
// Subscription Requests
// =============================================================================

#[derive(Serialize)]
#[serde(untagged)]
enum Field<'a> {
    Ticket {
        ticket: &'a str,
    },
    Type {
        #[serde(rename = "type")]
        kind: &'static str,
        codes: &'a [String],
    },
    Format {
        format: &'static str,
    },
}

/// Subscription frame.
///
/// Upbit has no unsubscribe; sending a new frame replaces the previous
/// set, so "unsubscribe" means sending the reduced request. The ticket is
/// fixed at construction so the same request always serializes to the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    ticket: String,
    orderbook: Vec<String>,
    trade: Vec<String>,
    ticker: Vec<String>,
}

impl SubscribeRequest {
    /// Empty request with a random ticket.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ticket(uuid::Uuid::new_v4().to_string())
    }

    /// Empty request with a caller-chosen ticket.
    #[must_use]
    pub fn with_ticket(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            orderbook: Vec::new(),
            trade: Vec::new(),
            ticker: Vec::new(),
        }
    }

    /// Add orderbook codes (`KRW-BTC`).
    #[must_use]
    pub fn with_orderbook(mut self, codes: &[String]) -> Self {
        self.orderbook.extend(codes.iter().map(|c| c.to_uppercase()));
        self
    }

    /// Add trade codes.
    #[must_use]
    pub fn with_trades(mut self, codes: &[String]) -> Self {
        self.trade.extend(codes.iter().map(|c| c.to_uppercase()));
        self
    }

    /// Add ticker codes.
    #[must_use]
    pub fn with_tickers(mut self, codes: &[String]) -> Self {
        self.ticker.extend(codes.iter().map(|c| c.to_uppercase()));
        self
    }

    /// Whether any code was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orderbook.is_empty() && self.trade.is_empty() && self.ticker.is_empty()
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut fields = vec![Field::Ticket {
            ticket: &self.ticket,
        }];
        for (kind, codes) in [
            ("orderbook", &self.orderbook),
            ("trade", &self.trade),
            ("ticker", &self.ticker),
        ] {
            if !codes.is_empty() {
                fields.push(Field::Type { kind, codes });
            }
        }
        fields.push(Field::Format { format: "DEFAULT" });
        serde_json::to_string(&fields)
    }
}

impl Default for SubscribeRequest {
    fn default() -> Self {
        Self::new()
    }
}

//! Bybit v5 Streams
//!
//! Public (spot, linear) and private streams share one envelope:
//! data frames carry a `topic`, control frames carry an `op`.
//!
//! # Keepalive
//!
//! Bybit drops connections that are silent for more than a few minutes and
//! recommends a `{"op":"ping"}` every 20 seconds. The reply is
//! `{"op":"ping","ret_msg":"pong",...}` on public streams and
//! `{"op":"pong",...}` on private ones; both classify as `Pong`.
//!
//! # Private Streams
//!
//! Authenticate with [`SignedAuth`](crate::infrastructure::auth::SignedAuth)
//! before subscribing to `order`, `position`, `wallet` and `execution`.
//!
//! # References
//!
//! - [WebSocket Connect](https://bybit-exchange.github.io/docs/v5/ws/connect)

mod classifier;
mod private;
mod public;

pub use classifier::BybitClassifier;
pub use private::BybitPrivateParser;
pub use public::BybitPublicParser;

use std::time::Duration;

use serde::Serialize;

use crate::application::ports::ConnectionPolicy;
use crate::domain::{ConnectionContext, HeartbeatAction, ReconnectionPolicy, Venue};

/// Spot public endpoint.
pub const PUBLIC_SPOT_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// USDT perpetual public endpoint.
pub const PUBLIC_LINEAR_URL: &str = "wss://stream.bybit.com/v5/public/linear";

/// Private endpoint.
pub const PRIVATE_URL: &str = "wss://stream.bybit.com/v5/private";

/// Recommended keepalive cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Silence tolerated after a keepalive.
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

const KEEPALIVE: &str = r#"{"op":"ping"}"#;

// =============================================================================
// Connection Policy
// =============================================================================

/// Bybit connection parameters.
#[derive(Debug, Clone)]
pub struct BybitPolicy {
    url: String,
    reconnection: ReconnectionPolicy,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl BybitPolicy {
    /// Create a policy for `url` with the recommended keepalive.
    #[must_use]
    pub fn new(url: impl Into<String>, reconnection: ReconnectionPolicy) -> Self {
        Self {
            url: url.into(),
            reconnection,
            ping_interval: PING_INTERVAL,
            ping_timeout: PING_TIMEOUT,
        }
    }

    /// Override the keepalive cadence.
    #[must_use]
    pub const fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }
}

impl ConnectionPolicy for BybitPolicy {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn create_connection_context(&self) -> ConnectionContext {
        ConnectionContext::new(self.url.clone()).with_ping(self.ping_interval, self.ping_timeout)
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

/// Topics on the private stream.
pub const PRIVATE_TOPICS: [&str; 4] = ["order", "position", "wallet", "execution"];

/// `subscribe` / `unsubscribe` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicRequest {
    op: &'static str,
    args: Vec<String>,
}

impl TopicRequest {
    /// Empty subscribe request.
    #[must_use]
    pub const fn subscribe() -> Self {
        Self {
            op: "subscribe",
            args: Vec::new(),
        }
    }

    /// Empty unsubscribe request.
    #[must_use]
    pub const fn unsubscribe() -> Self {
        Self {
            op: "unsubscribe",
            args: Vec::new(),
        }
    }

    /// Add orderbook topics at `depth` (1, 50, 200 or 500 levels).
    #[must_use]
    pub fn with_orderbook(mut self, depth: u16, symbols: &[String]) -> Self {
        self.args.extend(
            symbols
                .iter()
                .map(|s| format!("orderbook.{depth}.{}", s.to_uppercase())),
        );
        self
    }

    /// Add public trade topics.
    #[must_use]
    pub fn with_trades(mut self, symbols: &[String]) -> Self {
        self.args.extend(
            symbols
                .iter()
                .map(|s| format!("publicTrade.{}", s.to_uppercase())),
        );
        self
    }

    /// Add ticker topics.
    #[must_use]
    pub fn with_tickers(mut self, symbols: &[String]) -> Self {
        self.args
            .extend(symbols.iter().map(|s| format!("tickers.{}", s.to_uppercase())));
        self
    }

    /// Add every private topic.
    #[must_use]
    pub fn with_private_topics(mut self) -> Self {
        self.args
            .extend(PRIVATE_TOPICS.iter().map(|topic| (*topic).to_string()));
        self
    }

    /// Whether any topic was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
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

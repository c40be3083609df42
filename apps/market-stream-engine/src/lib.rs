#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Engine - Exchange WebSocket Ingestion
//!
//! A reconnecting WebSocket client engine that keeps one connection per
//! venue stream alive, authenticates private streams, replays
//! subscriptions after every reconnect, and turns raw payloads into typed
//! events delivered to registered callbacks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Connection lifecycle and event types
//!   - `connection`: States, error categories, backoff schedule
//!   - `events`: Orderbook, trade, ticker and account events
//!   - `message`: Raw payloads and message classification
//!
//! - **Application**: Port definitions and the processing pipeline
//!   - `ports`: Connection, auth and parser strategies
//!   - `services`: Handlers, bounded queue, callbacks, metrics
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: Connection engine and heartbeat
//!   - `venues`: Binance, Bybit and Upbit adapters
//!   - `auth`: No-op and HMAC-signed authentication
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! venue socket ──────► │  reader  │──►│ bounded queue│──►│ processor │──► callbacks
//!                      └──────────┘   │ (drop oldest)│   │ classify  │
//!        ▲                            └──────────────┘   │ parse     │
//!        │ pings, replies, resubscribe                   │ fan out   │
//!   ┌────┴──────────┐                                    └───────────┘
//!   │ connection    │◄── heartbeat
//!   │ loop + backoff│
//!   └───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection and market data types with no I/O.
pub mod domain;

/// Application layer - Ports and the processing pipeline.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::{
    AuthState, BalanceUpdate, ConnectionContext, ConnectionFailure, ConnectionState,
    ErrorCategory, ExecutionReport, HeartbeatAction, OrderBook, OrderStatus, OrderUpdate,
    PositionUpdate, PriceLevel, RawPayload, ReconnectionPolicy, Side, Ticker, Trade, Venue,
    WebSocketMessageType,
};

// Ports
pub use application::ports::{
    AuthError, AuthPolicy, ConnectionPolicy, MessageClassifier, PrivateParser, PublicParser,
    WireSender,
};

// Pipeline
pub use application::services::{
    AuthSignal, CallbackId, MessageHandler, PerformanceSnapshot, PrivateMessageHandler,
    PublicMessageHandler, QueueStats,
};

// Engine
pub use infrastructure::websocket::{ConnectionEngine, EngineConfig, EngineError, StateChange};

// Authentication
pub use infrastructure::auth::{NoAuth, SignedAuth};

// Infrastructure config
pub use infrastructure::config::{
    Channel, ConfigError, Credentials, EngineSettings, StreamKind, WebSocketSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

//! Domain Layer - Core connection and market data types.
//!
//! Pure value types shared by every venue adapter: connection lifecycle,
//! raw message classification, and the typed events subscribers receive.

/// Connection state machine, error categories, backoff schedule.
pub mod connection;

/// Typed market data and trading events.
pub mod events;

/// Why a connection ended.
pub mod failure;

/// Raw payloads and message type classification.
pub mod message;

/// Venue identifiers.
pub mod venue;

pub use connection::{
    AuthState, ConnectionContext, ConnectionState, ErrorCategory, HeartbeatAction,
    ReconnectionPolicy,
};
pub use events::{
    BalanceUpdate, ExecutionReport, OrderBook, OrderStatus, OrderUpdate, PositionUpdate,
    PriceLevel, Side, Ticker, Trade,
};
pub use failure::ConnectionFailure;
pub use message::{QueueEntry, RawPayload, WebSocketMessageType};
pub use venue::Venue;

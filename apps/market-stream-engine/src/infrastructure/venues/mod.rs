//! Venue Adapters
//!
//! Connection policies, classifiers, parsers and subscription builders for
//! each supported exchange. Everything venue-specific lives here; the
//! engine and handlers only see the ports.

pub mod binance;
pub mod bybit;
pub mod decode;
pub mod peek;
pub mod upbit;

pub use binance::{BinanceClassifier, BinanceParser, BinancePolicy, StreamRequest};
pub use bybit::{BybitClassifier, BybitPolicy, BybitPrivateParser, BybitPublicParser, TopicRequest};
pub use upbit::{SubscribeRequest, UpbitClassifier, UpbitParser, UpbitPolicy};

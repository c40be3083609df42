//! Port Interfaces
//!
//! Strategy interfaces that venue adapters implement. The engine and the
//! message handlers hold one instance of each and never inherit from them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ConnectionPolicy`: Connection parameters and reconnection decisions
//! - `AuthPolicy`: Signed handshake and confirmation
//! - `WireSender`: Raw socket writes used during the handshake
//!
//! ## Pipeline Ports
//!
//! - `MessageClassifier`: Cheap payload type detection
//! - `PublicParser` / `PrivateParser`: Payload decoding into domain events

mod auth_policy_port;
mod connection_policy_port;
mod parser_port;

pub use auth_policy_port::{AuthError, AuthPolicy, DEFAULT_AUTH_TIMEOUT, WireSender};
pub use connection_policy_port::ConnectionPolicy;
pub use parser_port::{AuthReply, MessageClassifier, ParseError, PrivateParser, PublicParser};

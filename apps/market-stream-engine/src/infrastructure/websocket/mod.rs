//! WebSocket Connection Engine
//!
//! - `engine`: Connection lifecycle, reader, processor and reconnects
//! - `heartbeat`: Liveness tracking and the periodic heartbeat driver
//! - `error`: Engine errors and transport error mapping

pub mod engine;
pub mod error;
pub mod heartbeat;

pub use engine::{ConnectionEngine, EngineConfig, StateChange};
pub use error::EngineError;
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};

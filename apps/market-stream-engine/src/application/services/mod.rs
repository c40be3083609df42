//! Application Services
//!
//! The message-processing side of the engine, independent of any venue
//! or transport.
//!
//! - `handler`: Classify / route / fan-out pipeline (public and private)
//! - `queue`: Bounded drop-oldest hand-off between reader and processor
//! - `callbacks`: Per-event subscriber lists
//! - `pool`: Reusable orderbook level buffers
//! - `performance`: Counters and latency percentiles
//! - `auth_signal`: Auth confirmation shared by policy and handler

pub mod auth_signal;
pub mod callbacks;
pub mod handler;
pub mod performance;
pub mod pool;
pub mod queue;

pub use auth_signal::{AuthOutcome, AuthSignal};
pub use callbacks::{CallbackId, CallbackRegistry, DispatchOutcome};
pub use handler::{MessageHandler, PrivateMessageHandler, PublicMessageHandler, ReplySink};
pub use performance::{PerformanceMetrics, PerformanceSnapshot, TypeSnapshot};
pub use pool::{LevelPool, ObjectPool, PoolStats};
pub use queue::{BoundedQueue, DEFAULT_QUEUE_CAPACITY, PushOutcome, QueueStats};

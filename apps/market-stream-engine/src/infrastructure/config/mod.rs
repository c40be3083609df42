//! Configuration Module
//!
//! Configuration loading for the stream engine binary.

mod settings;

pub use settings::{
    Channel, ConfigError, Credentials, EngineSettings, StreamKind, WebSocketSettings,
};

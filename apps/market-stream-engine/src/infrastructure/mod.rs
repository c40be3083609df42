//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Authentication policies (none, HMAC-signed).
pub mod auth;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Per-venue policies, classifiers and parsers.
pub mod venues;

/// Reconnecting WebSocket connection engine.
pub mod websocket;

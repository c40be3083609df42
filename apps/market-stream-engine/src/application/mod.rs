//! Application Layer - Ports and processing services.
//!
//! Ports are the strategy interfaces venue adapters implement; services
//! are the venue-agnostic processing pipeline built on top of them.

/// Strategy interfaces for venue adapters.
pub mod ports;

/// Message handlers, queue, callbacks and metrics.
pub mod services;

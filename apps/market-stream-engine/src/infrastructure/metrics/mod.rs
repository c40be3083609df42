//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Processed messages and pipeline failures by type
//! - **Callbacks**: Subscriber failures
//! - **Queue**: Overflow drops and enqueue-to-process latency
//! - **Connections**: Lifecycle state and reconnect attempts
//!
//! Every series carries a `venue` label. Recording before `init_metrics`
//! is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::{ConnectionState, ErrorCategory, Venue, WebSocketMessageType};

// =============================================================================
// Recorder Installation
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Later calls are no-ops and return the address of the first listener.
///
/// # Errors
///
/// Returns an error if the recorder or HTTP listener cannot be installed.
pub fn init_metrics(addr: SocketAddr) -> Result<SocketAddr, BuildError> {
    if let Some(existing) = INSTALLED.get() {
        return Ok(*existing);
    }

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(*INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_engine_messages_total",
        "Messages classified, parsed and dispatched"
    );
    describe_counter!(
        "stream_engine_message_errors_total",
        "Messages that failed classification, parsing or routing"
    );
    describe_counter!(
        "stream_engine_callback_errors_total",
        "Subscriber callbacks that returned an error or panicked"
    );
    describe_counter!(
        "stream_engine_queue_dropped_total",
        "Raw messages dropped because the processing queue was full"
    );
    describe_counter!(
        "stream_engine_reconnects_total",
        "Reconnection attempts by error category"
    );
    describe_gauge!(
        "stream_engine_connection_state",
        "Current connection state (0=disconnected .. 5=error)"
    );
    describe_histogram!(
        "stream_engine_processing_seconds",
        "Time from classification to the end of callback fan-out"
    );
    describe_histogram!(
        "stream_engine_queue_wait_seconds",
        "Time a raw message spent in the processing queue"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a processed message.
pub fn record_message(venue: Venue, msg_type: WebSocketMessageType, elapsed: Duration) {
    counter!(
        "stream_engine_messages_total",
        "venue" => venue.as_str(),
        "message_type" => msg_type.as_str()
    )
    .increment(1);
    histogram!(
        "stream_engine_processing_seconds",
        "venue" => venue.as_str(),
        "message_type" => msg_type.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a pipeline failure. `None` when the message never got a type.
pub fn record_message_error(venue: Venue, msg_type: Option<WebSocketMessageType>) {
    counter!(
        "stream_engine_message_errors_total",
        "venue" => venue.as_str(),
        "message_type" => msg_type.map_or("none", WebSocketMessageType::as_str)
    )
    .increment(1);
}

/// Record failed subscriber callbacks.
pub fn record_callback_errors(venue: Venue, count: u64) {
    counter!(
        "stream_engine_callback_errors_total",
        "venue" => venue.as_str()
    )
    .increment(count);
}

/// Record one queue overflow drop.
pub fn record_queue_dropped(venue: Venue) {
    counter!(
        "stream_engine_queue_dropped_total",
        "venue" => venue.as_str()
    )
    .increment(1);
}

/// Record how long a message waited in the queue.
pub fn record_queue_wait(venue: Venue, waited: Duration) {
    histogram!(
        "stream_engine_queue_wait_seconds",
        "venue" => venue.as_str()
    )
    .record(waited.as_secs_f64());
}

/// Record a reconnection attempt.
pub fn record_reconnect(venue: Venue, category: ErrorCategory) {
    counter!(
        "stream_engine_reconnects_total",
        "venue" => venue.as_str(),
        "category" => category.as_str()
    )
    .increment(1);
}

/// Publish the connection state.
pub fn set_connection_state(venue: Venue, state: ConnectionState) {
    gauge!(
        "stream_engine_connection_state",
        "venue" => venue.as_str()
    )
    .set(f64::from(state as u8));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message(
            Venue::Binance,
            WebSocketMessageType::Trade,
            Duration::from_micros(5),
        );
        record_message_error(Venue::Bybit, None);
        record_callback_errors(Venue::Upbit, 2);
        record_queue_dropped(Venue::Binance);
        record_queue_wait(Venue::Binance, Duration::from_micros(1));
        record_reconnect(Venue::Bybit, ErrorCategory::NetworkError);
        set_connection_state(Venue::Upbit, ConnectionState::Connected);
    }
}

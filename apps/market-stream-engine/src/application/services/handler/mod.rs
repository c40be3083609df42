//! Message Handlers
//!
//! Every payload goes through the same fixed pipeline:
//!
//! 1. classify (bounded, cheap)
//! 2. route by type to a parser
//! 3. fan the resulting events out to every registered callback
//! 4. record latency and counters
//! 5. on failure in 1-3, log with payload context and count the error
//!
//! [`run_pipeline`] is that skeleton as a plain generic function. The
//! public and private handlers supply the routing step; classifier and
//! parser are type parameters so the hot path stays monomorphic.

mod private;
mod public;

use std::sync::OnceLock;
use std::time::Instant;

use tokio::sync::mpsc;

use super::performance::{PerformanceMetrics, PerformanceSnapshot};
use crate::application::ports::{MessageClassifier, ParseError};
use crate::domain::{RawPayload, WebSocketMessageType};

pub use private::{DEFAULT_PENDING_CAPACITY, PrivateMessageHandler};
pub use public::PublicMessageHandler;

/// Outbound protocol replies (e.g. application-level pongs) produced while
/// handling a message. Drained by the connection loop.
pub type ReplySink = mpsc::Sender<String>;

// =============================================================================
// Handler Trait
// =============================================================================

/// What the engine's processor drives.
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one payload. Never propagates errors.
    fn handle(&self, payload: &RawPayload);

    /// Live counters.
    fn metrics(&self) -> &PerformanceMetrics;

    /// Read-only copy of the counters.
    fn performance_metrics(&self) -> PerformanceSnapshot {
        self.metrics().snapshot()
    }

    /// Give the handler a way to write protocol replies.
    fn attach_reply_sink(&self, _sink: ReplySink) {}

    /// A new socket was opened; forget per-connection state.
    fn on_connection_reset(&self) {}
}

// =============================================================================
// Pipeline
// =============================================================================

/// Run the fixed classify / route / record pipeline for one payload.
///
/// `route` parses and dispatches; it returns how many callback invocations
/// failed.
pub fn run_pipeline<C, R>(
    classifier: &C,
    metrics: &PerformanceMetrics,
    payload: &RawPayload,
    route: R,
) where
    C: MessageClassifier + ?Sized,
    R: FnOnce(WebSocketMessageType) -> Result<usize, ParseError>,
{
    let started = Instant::now();
    let msg_type = classifier.classify(payload);

    match route(msg_type) {
        Ok(callback_failures) => {
            metrics.record_callback_errors(callback_failures);
            metrics.record_message(msg_type, started.elapsed());
        }
        Err(e) => {
            metrics.record_error(Some(msg_type));
            tracing::warn!(
                msg_type = %msg_type,
                payload_kind = payload.kind(),
                payload_len = payload.len(),
                error = %e,
                "Failed to process message"
            );
        }
    }
}

/// Write-once holder for the reply sink.
#[derive(Debug, Default)]
pub(crate) struct ReplySlot(OnceLock<ReplySink>);

impl ReplySlot {
    pub(crate) fn attach(&self, sink: ReplySink) {
        if self.0.set(sink).is_err() {
            tracing::debug!("Reply sink already attached");
        }
    }

    pub(crate) fn send(&self, reply: String) {
        let Some(sink) = self.0.get() else {
            tracing::debug!("No reply sink attached, dropping protocol reply");
            return;
        };
        if let Err(e) = sink.try_send(reply) {
            tracing::warn!(error = %e, "Failed to queue protocol reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Venue;

    struct FixedClassifier(WebSocketMessageType);

    impl MessageClassifier for FixedClassifier {
        fn classify(&self, _payload: &RawPayload) -> WebSocketMessageType {
            self.0
        }
    }

    #[test]
    fn success_records_latency_and_callback_failures() {
        let metrics = PerformanceMetrics::new(Venue::Binance);
        let payload = RawPayload::text("{}");
        run_pipeline(
            &FixedClassifier(WebSocketMessageType::Trade),
            &metrics,
            &payload,
            |msg_type| {
                assert_eq!(msg_type, WebSocketMessageType::Trade);
                Ok(2)
            },
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_count, 1);
        assert_eq!(snapshot.callback_errors, 2);
        assert_eq!(snapshot.error_count, 0);
    }

    #[test]
    fn failure_is_counted_not_propagated() {
        let metrics = PerformanceMetrics::new(Venue::Binance);
        let payload = RawPayload::text("garbage");
        run_pipeline(
            &FixedClassifier(WebSocketMessageType::Unknown),
            &metrics,
            &payload,
            |_| Err(ParseError::Unrecognized),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_count, 0);
        assert_eq!(snapshot.error_count, 1);
    }

    #[tokio::test]
    async fn reply_slot_forwards_once_attached() {
        let slot = ReplySlot::default();
        slot.send("dropped".to_string());

        let (tx, mut rx) = mpsc::channel(4);
        slot.attach(tx);
        slot.send("pong".to_string());

        assert_eq!(rx.recv().await.as_deref(), Some("pong"));
        assert!(rx.try_recv().is_err());
    }
}

//! Performance Metrics
//!
//! Per-handler message counters and processing latency statistics. Counters
//! are atomics; latency samples live behind a short lock taken once per
//! message by the processor. Every recording is mirrored to the Prometheus
//! recorder through [`crate::infrastructure::metrics`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::domain::{Venue, WebSocketMessageType};
use crate::infrastructure::metrics;

/// Samples kept in each rolling window.
pub const LATENCY_WINDOW: usize = 1_000;

// =============================================================================
// Rolling Window
// =============================================================================

#[derive(Debug, Default)]
struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    fn push(&mut self, sample: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn percentiles(&self) -> (Duration, Duration) {
        if self.samples.is_empty() {
            return (Duration::ZERO, Duration::ZERO);
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        (percentile(&sorted, 50), percentile(&sorted, 99))
    }
}

/// Nearest-rank percentile over a sorted, non-empty slice.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

#[derive(Debug, Default)]
struct TypeStats {
    count: u64,
    total: Duration,
    max: Duration,
    window: LatencyWindow,
}

// =============================================================================
// Snapshots
// =============================================================================

/// Latency summary for one message type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeSnapshot {
    /// Messages of this type processed.
    pub count: u64,
    /// Worst processing time seen.
    pub max: Duration,
    /// Mean processing time over all messages.
    pub avg: Duration,
    /// Median over the rolling window.
    pub p50: Duration,
    /// 99th percentile over the rolling window.
    pub p99: Duration,
}

/// Read-only copy of a handler's metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceSnapshot {
    /// Messages processed successfully.
    pub message_count: u64,
    /// Messages that failed classification or parsing.
    pub error_count: u64,
    /// Callback invocations that returned an error or panicked.
    pub callback_errors: u64,
    /// Messages parked or dropped by the authentication gate.
    pub gated_messages: u64,
    /// Median processing time across all types.
    pub p50: Duration,
    /// 99th percentile processing time across all types.
    pub p99: Duration,
    /// Per-type statistics.
    pub by_type: HashMap<WebSocketMessageType, TypeSnapshot>,
}

impl PerformanceSnapshot {
    /// Statistics for one type, zeroed if it was never seen.
    #[must_use]
    pub fn for_type(&self, msg_type: WebSocketMessageType) -> TypeSnapshot {
        self.by_type.get(&msg_type).copied().unwrap_or_default()
    }
}

// =============================================================================
// Performance Metrics
// =============================================================================

/// Processing counters for one handler.
#[derive(Debug)]
pub struct PerformanceMetrics {
    venue: Venue,
    message_count: AtomicU64,
    error_count: AtomicU64,
    callback_errors: AtomicU64,
    gated_messages: AtomicU64,
    overall: Mutex<LatencyWindow>,
    by_type: Mutex<HashMap<WebSocketMessageType, TypeStats>>,
}

impl PerformanceMetrics {
    /// Create empty metrics labelled with `venue`.
    #[must_use]
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            message_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            callback_errors: AtomicU64::new(0),
            gated_messages: AtomicU64::new(0),
            overall: Mutex::new(LatencyWindow::default()),
            by_type: Mutex::new(HashMap::new()),
        }
    }

    /// Record a successfully processed message.
    pub fn record_message(&self, msg_type: WebSocketMessageType, elapsed: Duration) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.overall.lock().push(elapsed);
        {
            let mut by_type = self.by_type.lock();
            let stats = by_type.entry(msg_type).or_default();
            stats.count += 1;
            stats.total += elapsed;
            stats.max = stats.max.max(elapsed);
            stats.window.push(elapsed);
        }
        metrics::record_message(self.venue, msg_type, elapsed);
    }

    /// Record a message that failed. `msg_type` is `None` when the failure
    /// happened before classification completed.
    pub fn record_error(&self, msg_type: Option<WebSocketMessageType>) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        metrics::record_message_error(self.venue, msg_type);
    }

    /// Record failed callback invocations.
    pub fn record_callback_errors(&self, count: usize) {
        if count > 0 {
            self.callback_errors
                .fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_callback_errors(self.venue, count as u64);
        }
    }

    /// Record a message held back by the authentication gate.
    pub fn record_gated(&self) {
        self.gated_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages processed successfully so far.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Failed messages so far.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Copy out the current state.
    #[must_use]
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let (p50, p99) = self.overall.lock().percentiles();
        let by_type = self
            .by_type
            .lock()
            .iter()
            .map(|(msg_type, stats)| {
                let (p50, p99) = stats.window.percentiles();
                let avg = u32::try_from(stats.count)
                    .ok()
                    .filter(|count| *count > 0)
                    .map_or(Duration::ZERO, |count| stats.total / count);
                (
                    *msg_type,
                    TypeSnapshot {
                        count: stats.count,
                        max: stats.max,
                        avg,
                        p50,
                        p99,
                    },
                )
            })
            .collect();

        PerformanceSnapshot {
            message_count: self.message_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            gated_messages: self.gated_messages.load(Ordering::Relaxed),
            p50,
            p99,
            by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_type_statistics() {
        let metrics = PerformanceMetrics::new(Venue::Binance);
        for micros in [10, 20, 30, 40] {
            metrics.record_message(
                WebSocketMessageType::Trade,
                Duration::from_micros(micros),
            );
        }
        metrics.record_message(WebSocketMessageType::Ticker, Duration::from_micros(5));
        metrics.record_error(None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_count, 5);
        assert_eq!(snapshot.error_count, 1);

        let trade = snapshot.for_type(WebSocketMessageType::Trade);
        assert_eq!(trade.count, 4);
        assert_eq!(trade.max, Duration::from_micros(40));
        assert_eq!(trade.avg, Duration::from_micros(25));
        assert_eq!(trade.p50, Duration::from_micros(20));
        assert_eq!(trade.p99, Duration::from_micros(40));

        assert_eq!(snapshot.for_type(WebSocketMessageType::Orderbook).count, 0);
    }

    #[test]
    fn window_is_rolling() {
        let metrics = PerformanceMetrics::new(Venue::Upbit);
        metrics.record_message(WebSocketMessageType::Trade, Duration::from_secs(1));
        for _ in 0..LATENCY_WINDOW {
            metrics.record_message(WebSocketMessageType::Trade, Duration::from_micros(1));
        }

        let trade = metrics.snapshot().for_type(WebSocketMessageType::Trade);
        assert_eq!(trade.p99, Duration::from_micros(1));
        assert_eq!(trade.max, Duration::from_secs(1));
    }

    #[test]
    fn nearest_rank_percentile() {
        let sorted: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 50), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 99), Duration::from_millis(99));
        assert_eq!(percentile(&sorted[..1], 99), Duration::from_millis(1));
    }
}

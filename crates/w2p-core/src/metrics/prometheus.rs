//! Prometheus metrics export.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for publish latency.
/// Converts to seconds: [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
const PUBLISH_DURATION_BUCKETS_MS: [u64; 8] = [10, 25, 50, 100, 250, 500, 1000, 2500];

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "w2p";

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Connection and stream read failures
    Source,
    /// Publish and token failures
    Sink,
    /// Malformed frames
    Decode,
}

impl ErrorType {
    const ALL: [ErrorType; 3] = [ErrorType::Source, ErrorType::Sink, ErrorType::Decode];

    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Source => "source",
            ErrorType::Sink => "sink",
            ErrorType::Decode => "decode",
        }
    }

    fn index(&self) -> usize {
        match self {
            ErrorType::Source => 0,
            ErrorType::Sink => 1,
            ErrorType::Decode => 2,
        }
    }
}

/// Relay metrics with counters, gauges, and a publish latency histogram.
pub struct IngestionMetrics {
    // === COUNTERS ===
    /// Non-empty frames read from the stream
    frames_total: AtomicU64,
    /// Empty frames (keep-alives)
    heartbeats_total: AtomicU64,
    /// Events acknowledged by the sink
    published_total: AtomicU64,
    /// Publish attempts repeated after a retryable failure
    publish_retries_total: AtomicU64,
    /// Events dropped after exhausting publish retries
    lost_total: AtomicU64,
    /// Successful stream connections
    connections_total: AtomicU64,
    /// Errors by type, indexed by `ErrorType::index`
    errors: [AtomicU64; 3],

    // === GAUGES ===
    connection_state: AtomicU64,
    backoff_ms: AtomicU64,

    // === HISTOGRAM: publish_duration_seconds ===
    publish_duration_sum_ms: AtomicU64,
    publish_duration_count: AtomicU64,
    /// Cumulative bucket counts; the last slot is +Inf
    publish_duration_buckets: [AtomicU64; 9],
}

impl IngestionMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            heartbeats_total: AtomicU64::new(0),
            published_total: AtomicU64::new(0),
            publish_retries_total: AtomicU64::new(0),
            lost_total: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            errors: Default::default(),
            connection_state: AtomicU64::new(0),
            backoff_ms: AtomicU64::new(0),
            publish_duration_sum_ms: AtomicU64::new(0),
            publish_duration_count: AtomicU64::new(0),
            publish_duration_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    /// Record a non-empty frame.
    pub fn record_frame(&self) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a keep-alive frame.
    pub fn record_heartbeat(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful publish and its latency.
    pub fn record_published(&self, duration: Duration) {
        self.published_total.fetch_add(1, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.publish_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.publish_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in PUBLISH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.publish_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.publish_duration_buckets[8].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a publish retry.
    pub fn record_publish_retry(&self) {
        self.publish_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event given up on.
    pub fn record_lost(&self) {
        self.lost_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful connection.
    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error with a specific type label.
    pub fn record_error(&self, error_type: ErrorType) {
        self.errors[error_type.index()].fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the connection state gauge.
    pub fn set_connection_state(&self, state: u64) {
        self.connection_state.store(state, Ordering::Relaxed);
    }

    /// Update the current reconnect delay.
    pub fn set_backoff(&self, delay: Duration) {
        self.backoff_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn heartbeats_total(&self) -> u64 {
        self.heartbeats_total.load(Ordering::Relaxed)
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }

    pub fn publish_retries_total(&self) -> u64 {
        self.publish_retries_total.load(Ordering::Relaxed)
    }

    pub fn lost_total(&self) -> u64 {
        self.lost_total.load(Ordering::Relaxed)
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total errors across all types.
    pub fn errors_total(&self) -> u64 {
        self.errors.iter().map(|e| e.load(Ordering::Relaxed)).sum()
    }

    /// Get error count by type.
    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.errors[error_type.index()].load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> u64 {
        self.connection_state.load(Ordering::Relaxed)
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms.load(Ordering::Relaxed)
    }

    /// Get publish latency histogram data for Prometheus export.
    pub fn publish_duration_histogram(&self) -> PublishDurationHistogram {
        let mut buckets = [(0.0, 0); 8];
        for (i, &bucket_ms) in PUBLISH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.publish_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        PublishDurationHistogram {
            sum_seconds: self.publish_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.publish_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.publish_duration_buckets[8].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use w2p_core::metrics::IngestionMetrics;
    ///
    /// let metrics = IngestionMetrics::new();
    /// metrics.record_frame();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("w2p_frames_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(4096);

        // === COUNTERS ===
        let counters = [
            ("frames_total", "Non-empty frames read from the event stream", self.frames_total()),
            ("heartbeats_total", "Empty keep-alive frames", self.heartbeats_total()),
            ("published_total", "Events published to Pub/Sub", self.published_total()),
            ("publish_retries_total", "Publish attempts retried", self.publish_retries_total()),
            ("lost_total", "Events dropped after exhausting publish retries", self.lost_total()),
            ("connections_total", "Successful event stream connections", self.connections_total()),
            ("errors_total", "Total errors encountered", self.errors_total()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {prefix}_{name} {help}");
            let _ = writeln!(out, "# TYPE {prefix}_{name} counter");
            let _ = writeln!(out, "{prefix}_{name} {value}");
            out.push('\n');
        }

        let _ = writeln!(out, "# HELP {prefix}_errors Errors by type");
        let _ = writeln!(out, "# TYPE {prefix}_errors counter");
        for error_type in ErrorType::ALL {
            let _ = writeln!(
                out,
                "{prefix}_errors{{type=\"{}\"}} {}",
                error_type.as_label(),
                self.errors_by_type(error_type)
            );
        }
        out.push('\n');

        // === GAUGES ===
        let gauges = [
            (
                "connection_state",
                "Connection state (0=disconnected 1=connecting 2=streaming 3=backoff 4=stopped)",
                self.connection_state(),
            ),
            ("backoff_milliseconds", "Current reconnect delay", self.backoff_ms()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {prefix}_{name} {help}");
            let _ = writeln!(out, "# TYPE {prefix}_{name} gauge");
            let _ = writeln!(out, "{prefix}_{name} {value}");
            out.push('\n');
        }

        // === HISTOGRAM ===
        let hist = self.publish_duration_histogram();
        let _ = writeln!(
            out,
            "# HELP {prefix}_publish_duration_seconds Latency of successful publish calls"
        );
        let _ = writeln!(out, "# TYPE {prefix}_publish_duration_seconds histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                out,
                "{prefix}_publish_duration_seconds_bucket{{le=\"{le}\"}} {count}"
            );
        }
        let _ = writeln!(
            out,
            "{prefix}_publish_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(
            out,
            "{prefix}_publish_duration_seconds_sum {}",
            hist.sum_seconds
        );
        let _ = writeln!(out, "{prefix}_publish_duration_seconds_count {}", hist.count);

        out
    }
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish latency histogram data for export.
#[derive(Debug, Clone)]
pub struct PublishDurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 8],
    /// +Inf bucket count
    pub inf_bucket: u64,
}

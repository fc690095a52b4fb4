//! Relay metrics.

mod prometheus;

pub use prometheus::{ErrorType, IngestionMetrics, PublishDurationHistogram, DEFAULT_PREFIX};

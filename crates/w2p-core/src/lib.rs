//! W2P Core - server-sent events to Google Cloud Pub/Sub relay
//!
//! This library consumes an unbounded SSE feed of change notifications
//! (Wikimedia recent changes by default) and republishes every event to a
//! Pub/Sub topic with:
//!
//! - Incremental SSE parsing over a long-lived HTTP stream
//! - `$schema` -> `schema` key normalization
//! - Reconnect with a single capped backoff schedule
//! - Ordered, retried publishing through the Pub/Sub REST API

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod normalize;
pub mod retry;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use error::{DecodeError, SinkError, SourceError};
pub use error::{Error, Result};

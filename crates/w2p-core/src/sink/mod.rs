//! Publish side of the relay.
//!
//! The ingestion loop only needs [`EventSink::publish`]; the Pub/Sub REST
//! client is the production implementation.

mod auth;
mod pubsub;

pub use auth::{
    NoAuth, ServiceAccountKey, ServiceAccountTokenProvider, TokenProvider, PUBSUB_SCOPE,
};
pub use pubsub::PubSubPublisher;

use crate::error::SinkError;
use async_trait::async_trait;

/// A pub/sub service accepting opaque payloads.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one payload and return the server-assigned message id.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, SinkError>;

    /// Verify the topic is reachable; returns its subscription count.
    async fn check_topic(&self, topic: &str) -> Result<usize, SinkError>;
}

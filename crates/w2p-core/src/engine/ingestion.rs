//! Main ingestion engine orchestration.
//!
//! Drives one connection at a time through
//! `Disconnected -> Connecting -> Streaming -> Backoff -> Connecting ...`:
//! - every non-empty frame is decoded, normalized and published before the
//!   next frame is read, so publish order is arrival order
//! - malformed frames are dropped and counted
//! - stream failures feed a single reconnect backoff that resets on every
//!   successful connection
//! - every await is raced against the shutdown signal

use super::state::ConnectionState;
use crate::config::Config;
use crate::error::{Error, SinkError, SourceError};
use crate::health::{HealthCheck, SINK, SOURCE};
use crate::metrics::{ErrorType, IngestionMetrics};
use crate::normalize::{decode_payload, encode_payload, normalize};
use crate::retry::Backoff;
use crate::sink::{EventSink, PubSubPublisher};
use crate::source::{EventSource, FrameReader, SseEvent, SseSource};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Characters of a malformed payload included in the warning.
const PREVIEW_CHARS: usize = 200;

/// How a streaming session ended.
enum StreamEnd {
    Shutdown,
    Failed(SourceError),
}

/// What happened to one event handed to the sink.
enum PublishOutcome {
    Published,
    Lost,
    Shutdown,
}

/// Main ingestion engine.
pub struct IngestionEngine {
    config: Config,
    source: Arc<dyn EventSource>,
    sink: Arc<dyn EventSink>,
    topic: String,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    state: ConnectionState,
    consecutive_decode_errors: u32,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at construction so a signal sent before `run` is not lost
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl IngestionEngine {
    /// Create an engine with the HTTP event source and the Pub/Sub publisher.
    ///
    /// Fails on invalid configuration or unusable credentials; nothing is
    /// connected yet.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let source = Arc::new(SseSource::new(config.source.clone())?);
        let sink = Arc::new(PubSubPublisher::from_config(&config.sink)?);

        Ok(Self::with_components(config, source, sink))
    }

    /// Create an engine around explicit source and sink implementations.
    pub fn with_components(
        config: Config,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let topic = config.sink.topic_path();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            source,
            sink,
            topic,
            metrics: Arc::new(IngestionMetrics::new()),
            health: Arc::new(HealthCheck::for_relay()),
            state: ConnectionState::Disconnected,
            consecutive_decode_errors: 0,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// Run until shutdown (`Ok`) or a fatal error (`Err`).
    pub async fn run(&mut self) -> Result<()> {
        if self.state == ConnectionState::Stopped {
            return Err(Error::Shutdown);
        }

        let mut shutdown_rx = match self.shutdown_rx.take() {
            Some(rx) => rx,
            None => self.shutdown_tx.subscribe(),
        };

        info!(
            source = %self.source.describe(),
            topic = %self.topic,
            "Ingestion engine started"
        );

        let result = self.run_inner(&mut shutdown_rx).await;
        self.transition(ConnectionState::Stopped);

        match &result {
            Ok(()) => info!(
                published = self.metrics.published_total(),
                decode_errors = self.metrics.errors_by_type(ErrorType::Decode),
                lost = self.metrics.lost_total(),
                "Ingestion engine stopped"
            ),
            Err(e) => error!(error = %e, "Ingestion engine stopped on fatal error"),
        }

        result
    }

    async fn run_inner(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
        if self.config.sink.check_topic_on_startup {
            let checked = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                result = self.sink.check_topic(&self.topic) => result,
            };
            self.on_topic_check(checked)?;
        }

        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            self.transition(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                result = self.source.connect() => result,
            };

            let failure = match connected {
                Ok(mut reader) => {
                    backoff.reset();
                    self.metrics.set_backoff(Duration::ZERO);
                    self.metrics.record_connection();
                    self.health.mark_healthy(SOURCE);
                    self.transition(ConnectionState::Streaming);

                    match self.stream(reader.as_mut(), shutdown_rx).await? {
                        StreamEnd::Shutdown => {
                            info!("Shutdown signal received");
                            return Ok(());
                        }
                        StreamEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.metrics.record_error(ErrorType::Source);

            if failure.is_fatal() {
                self.health.mark_unhealthy(SOURCE, &failure.to_string());
                return Err(failure.into());
            }

            if !backoff.should_retry() {
                self.health.mark_unhealthy(SOURCE, &failure.to_string());
                error!(
                    attempts = backoff.attempts(),
                    error = %failure,
                    "Reconnect attempts exhausted"
                );
                return Err(failure.into());
            }

            let delay = backoff.next_delay();
            self.health.mark_degraded(SOURCE, &failure.to_string());
            self.metrics.set_backoff(delay);
            self.transition(ConnectionState::Backoff);

            warn!(
                error = %failure,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Event stream failed, reconnecting after backoff"
            );

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn on_topic_check(&self, result: std::result::Result<usize, SinkError>) -> Result<()> {
        match result {
            Ok(subscriptions) => {
                self.health.mark_healthy(SINK);
                info!(topic = %self.topic, subscriptions, "Pub/Sub topic reachable");
                if subscriptions == 0 {
                    warn!(topic = %self.topic, "Topic has no subscriptions; published events will not be retained");
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.health.mark_unhealthy(SINK, &e.to_string());
                Err(e.into())
            }
            Err(e) => {
                self.health.mark_degraded(SINK, &e.to_string());
                warn!(topic = %self.topic, error = %e, "Topic check failed, continuing");
                Ok(())
            }
        }
    }

    /// Read frames until the connection fails or shutdown is requested.
    async fn stream(
        &mut self,
        reader: &mut dyn FrameReader,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<StreamEnd> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return Ok(StreamEnd::Shutdown),
                frame = reader.next_frame() => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return Ok(StreamEnd::Failed(e)),
            };

            if frame.is_empty() {
                self.metrics.record_heartbeat();
                debug!("Heartbeat");
                continue;
            }
            self.metrics.record_frame();

            let event = match decode_payload(&frame.data) {
                Ok(event) => {
                    self.consecutive_decode_errors = 0;
                    event
                }
                Err(e) => {
                    self.on_decode_error(&frame, &e.to_string())?;
                    continue;
                }
            };

            let payload = encode_payload(&normalize(event));

            if let PublishOutcome::Shutdown = self.publish(payload, shutdown_rx).await? {
                return Ok(StreamEnd::Shutdown);
            }
        }
    }

    fn on_decode_error(&mut self, frame: &SseEvent, reason: &str) -> Result<()> {
        self.metrics.record_error(ErrorType::Decode);
        self.consecutive_decode_errors += 1;

        let preview: String = frame.data.chars().take(PREVIEW_CHARS).collect();
        warn!(
            error = %reason,
            event_id = ?frame.id,
            preview = %preview,
            "Dropping malformed event"
        );

        let limit = self.config.source.max_consecutive_decode_errors;
        if limit > 0 && self.consecutive_decode_errors >= limit {
            self.health.mark_unhealthy(SOURCE, "too many malformed events");
            return Err(SourceError::TooManyDecodeErrors(self.consecutive_decode_errors).into());
        }

        Ok(())
    }

    /// Publish one payload, retrying transient failures per `sink.retry`.
    async fn publish(
        &mut self,
        payload: Vec<u8>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<PublishOutcome> {
        let mut retry = Backoff::new(self.config.sink.retry.clone());

        loop {
            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return Ok(PublishOutcome::Shutdown),
                result = self.sink.publish(&self.topic, payload.clone()) => result,
            };

            let e = match result {
                Ok(message_id) => {
                    self.metrics.record_published(start.elapsed());
                    self.health.mark_published();
                    self.health.mark_healthy(SINK);
                    debug!(message_id = %message_id, "Published event");
                    self.log_progress();
                    return Ok(PublishOutcome::Published);
                }
                Err(e) => e,
            };

            self.metrics.record_error(ErrorType::Sink);

            if e.is_fatal() {
                self.health.mark_unhealthy(SINK, &e.to_string());
                return Err(e.into());
            }

            if !e.is_retryable() || !retry.should_retry() {
                self.metrics.record_lost();
                self.health.mark_degraded(SINK, &e.to_string());
                error!(
                    error = %e,
                    attempts = retry.attempts() + 1,
                    topic = %self.topic,
                    "Publish failed, event dropped"
                );
                return Ok(PublishOutcome::Lost);
            }

            let delay = retry.next_delay();
            self.metrics.record_publish_retry();
            self.health.mark_degraded(SINK, &e.to_string());
            warn!(
                error = %e,
                attempt = retry.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Publish failed, retrying"
            );

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return Ok(PublishOutcome::Shutdown),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn log_progress(&self) {
        let interval = self.config.monitoring.progress_interval;
        let published = self.metrics.published_total();
        if interval > 0 && published % interval == 0 {
            info!(
                published,
                decode_errors = self.metrics.errors_by_type(ErrorType::Decode),
                lost = self.metrics.lost_total(),
                connections = self.metrics.connections_total(),
                "Progress"
            );
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Connection state changed");
        self.state = next;
        self.health.set_connection_state(next);
        self.metrics.set_connection_state(next.as_gauge());
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.health)
    }

    /// Get shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Fully qualified topic events are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

//! HTTP event stream client.
//!
//! Opens a long-lived `GET` with `Accept: text/event-stream` and turns the
//! chunked body into parsed frames. One [`SseSource`] is created at startup;
//! every call to [`EventSource::connect`] opens a fresh connection with a
//! fresh parser.

use super::parser::{SseEvent, SseParser};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{info, warn};

/// Something that can open a stream of SSE frames.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new connection. Returns once the server accepted the request.
    async fn connect(&self) -> std::result::Result<Box<dyn FrameReader>, SourceError>;

    /// Where frames come from, for logging.
    fn describe(&self) -> String;
}

/// An open connection yielding frames in arrival order.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or the error that ended the stream.
    async fn next_frame(&mut self) -> std::result::Result<SseEvent, SourceError>;
}

/// `reqwest`-backed event source.
pub struct SseSource {
    config: SourceConfig,
    http_client: reqwest::Client,
}

impl SseSource {
    /// Build the HTTP client. Fails only on an unusable TLS setup.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            // No overall timeout: the response is a long-lived stream
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone());

        if config.danger_accept_invalid_certs {
            warn!(
                url = %config.url,
                "Accepting invalid TLS certificates for the event source; traffic can be intercepted"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http_client = builder
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl EventSource for SseSource {
    async fn connect(&self) -> std::result::Result<Box<dyn FrameReader>, SourceError> {
        let url = &self.config.url;

        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| SourceError::ConnectionFailed {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        info!(url = %url, status = status.as_u16(), "Event stream connected");

        let read_timeout = match self.config.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Box::new(HttpFrameReader {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            read_timeout,
        }))
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}

/// Frames parsed from a streaming HTTP body.
struct HttpFrameReader {
    body: BoxStream<'static, std::result::Result<Vec<u8>, reqwest::Error>>,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    read_timeout: Option<Duration>,
}

impl HttpFrameReader {
    async fn next_chunk(&mut self) -> std::result::Result<Vec<u8>, SourceError> {
        let next = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.body.next())
                .await
                .map_err(|_| SourceError::IdleTimeout(timeout.as_secs()))?,
            None => self.body.next().await,
        };

        match next {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(e)) => Err(SourceError::Interrupted(e.to_string())),
            None => Err(SourceError::Ended),
        }
    }
}

#[async_trait]
impl FrameReader for HttpFrameReader {
    async fn next_frame(&mut self) -> std::result::Result<SseEvent, SourceError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let bytes = self.next_chunk().await?;
            self.pending.extend(self.parser.feed(&bytes)?);
        }
    }
}

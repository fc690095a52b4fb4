//! Error types for w2p core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Each domain error knows whether retrying can ever succeed (`is_fatal`),
//! which is what the ingestion loop uses to decide between backing off and
//! aborting.

use thiserror::Error;

/// Result type alias for w2p operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for w2p.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Pub/Sub sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Whether the error must stop the relay instead of being retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Source(e) => e.is_fatal(),
            Error::Sink(e) => e.is_fatal(),
            Error::Shutdown => false,
            _ => true,
        }
    }
}

/// Errors raised while connecting to or reading from the event stream.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to establish the connection
    #[error("Connection failed to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Transport failure while reading frames
    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    /// No bytes received within the read timeout
    #[error("Stream idle for {0}s")]
    IdleTimeout(u64),

    /// Server closed the stream
    #[error("Stream ended by server")]
    Ended,

    /// Too many malformed frames in a row
    #[error("{0} consecutive malformed events")]
    TooManyDecodeErrors(u32),
}

impl SourceError {
    /// Reconnecting cannot fix 401, 403 or a stream of garbage.
    pub fn is_fatal(&self) -> bool {
        match self {
            SourceError::HttpStatus { status, .. } => *status == 401 || *status == 403,
            SourceError::TooManyDecodeErrors(_) => true,
            _ => false,
        }
    }
}

/// Errors raised by the Pub/Sub sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Credentials file missing, unreadable or malformed
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Token exchange or publish rejected as unauthorized
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Topic does not exist
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Non-success response from the publish endpoint
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Transport-level failure (connect, timeout, reset)
    #[error("Request failed: {0}")]
    Request(String),

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SinkError {
    /// Errors that need operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SinkError::Credentials(_) | SinkError::Auth(_) | SinkError::TopicNotFound(_)
        )
    }

    /// Errors worth retrying for the same message.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Request(_) => true,
            SinkError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Map a failed HTTP response to the matching sink error.
    pub fn from_status(status: u16, topic: &str, message: String) -> Self {
        match status {
            401 | 403 => SinkError::Auth(format!("HTTP {}: {}", status, message)),
            404 => SinkError::TopicNotFound(topic.to_string()),
            _ => SinkError::HttpStatus { status, message },
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Request(err.to_string())
    }
}

/// A frame whose data is not a JSON object.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Data is not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Data is valid JSON but not an object
    #[error("Expected JSON object, got {0}")]
    NotAnObject(&'static str),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let source_err = SourceError::ConnectionFailed {
            url: "https://example.org/stream".into(),
            message: "connection refused".into(),
        };
        let err: Error = source_err.into();
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_source_error_fatality() {
        let unauthorized = SourceError::HttpStatus {
            url: "u".into(),
            status: 401,
        };
        assert!(unauthorized.is_fatal());

        let unavailable = SourceError::HttpStatus {
            url: "u".into(),
            status: 503,
        };
        assert!(!unavailable.is_fatal());
        assert!(!SourceError::Ended.is_fatal());
        assert!(!SourceError::IdleTimeout(60).is_fatal());
        assert!(SourceError::TooManyDecodeErrors(100).is_fatal());
    }

    #[test]
    fn test_sink_error_classification() {
        let forbidden = SinkError::from_status(403, "projects/p/topics/t", "denied".into());
        assert!(forbidden.is_fatal());
        assert!(!forbidden.is_retryable());

        let missing = SinkError::from_status(404, "projects/p/topics/t", String::new());
        assert!(matches!(missing, SinkError::TopicNotFound(_)));
        assert!(missing.is_fatal());

        let throttled = SinkError::from_status(429, "t", "slow down".into());
        assert!(throttled.is_retryable());
        assert!(!throttled.is_fatal());

        let bad_request = SinkError::from_status(400, "t", "bad".into());
        assert!(!bad_request.is_retryable());
        assert!(!bad_request.is_fatal());
    }

    #[test]
    fn test_top_level_fatality() {
        assert!(Error::Config("x".into()).is_fatal());
        assert!(Error::Sink(SinkError::Auth("x".into())).is_fatal());
        assert!(!Error::Source(SourceError::Ended).is_fatal());
        assert!(!Error::Shutdown.is_fatal());
    }
}

//! Configuration structures for w2p.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI
//! flags or environment variables. The TOML file is optional: every required
//! value can be supplied through overrides alone.

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Event stream configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Pub/Sub configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Stream reconnect schedule
    #[serde(default)]
    pub reconnect: RetryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Event stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Server-sent events endpoint
    #[serde(default = "default_source_url")]
    pub url: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP/TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Treat the stream as dead after this many seconds without bytes (0 = never)
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Abort after this many malformed frames in a row (0 = never)
    #[serde(default)]
    pub max_consecutive_decode_errors: u32,

    /// Skip TLS certificate verification. Never enable outside debugging.
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_consecutive_decode_errors: 0,
            danger_accept_invalid_certs: false,
        }
    }
}

/// Pub/Sub sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// GCP project id
    #[serde(default)]
    pub project: String,

    /// Topic id within the project
    #[serde(default)]
    pub topic: String,

    /// Path to a service account key file. The path is never logged.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Pub/Sub API endpoint
    #[serde(default = "default_pubsub_endpoint")]
    pub endpoint: String,

    /// Emulator host (`host:port`); disables authentication
    #[serde(default)]
    pub emulator_host: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Verify the topic exists before streaming
    #[serde(default = "default_enabled")]
    pub check_topic_on_startup: bool,

    /// Per-message publish retry schedule
    #[serde(default = "RetryConfig::for_publish")]
    pub retry: RetryConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            topic: String::new(),
            credentials_path: None,
            endpoint: default_pubsub_endpoint(),
            emulator_host: None,
            request_timeout_secs: default_request_timeout_secs(),
            check_topic_on_startup: default_enabled(),
            retry: RetryConfig::for_publish(),
        }
    }
}

impl SinkConfig {
    /// Fully qualified topic path, `projects/{project}/topics/{topic}`.
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{}", host.trim_end_matches('/')),
            None => self.endpoint.trim_end_matches('/').to_string(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log an info line every N published events (0 = never)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            progress_interval: default_progress_interval(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_source_url() -> String {
    "https://stream.wikimedia.org/v2/stream/recentchange".to_string()
}
fn default_user_agent() -> String {
    concat!("w2p/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}
fn default_progress_interval() -> u64 {
    1000
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.source.url.is_empty() {
            return Err(crate::Error::Config("Source URL is required".into()));
        }

        if !self.source.url.starts_with("http://") && !self.source.url.starts_with("https://") {
            return Err(crate::Error::Config(format!(
                "Source URL must be http(s): {}",
                self.source.url
            )));
        }

        if self.source.connect_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "Source connect timeout must be greater than zero".into(),
            ));
        }

        if self.sink.project.is_empty() {
            return Err(crate::Error::Config("Pub/Sub project is required".into()));
        }

        if self.sink.topic.is_empty() {
            return Err(crate::Error::Config("Pub/Sub topic is required".into()));
        }

        if self.sink.emulator_host.is_none() && self.sink.credentials_path.is_none() {
            return Err(crate::Error::Config(
                "Credentials path is required unless an emulator host is set".into(),
            ));
        }

        if self.sink.request_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "Pub/Sub request timeout must be greater than zero".into(),
            ));
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err(crate::Error::Config(
                "Reconnect base delay must be greater than zero".into(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(crate::Error::Config(
                "Reconnect max delay must not be below the base delay".into(),
            ));
        }

        if self.source.danger_accept_invalid_certs {
            tracing::warn!(
                url = %self.source.url,
                "TLS certificate verification is DISABLED for the event source"
            );
        }

        Ok(())
    }
}

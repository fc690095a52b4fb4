//! Google Cloud Pub/Sub REST publisher.
//!
//! Uses the v1 JSON API directly:
//! - `POST {base}/v1/{topic}:publish` with base64 message data
//! - `GET {base}/v1/{topic}/subscriptions` for the startup check

use super::auth::{NoAuth, ServiceAccountKey, ServiceAccountTokenProvider, TokenProvider};
use super::EventSink;
use crate::config::SinkConfig;
use crate::error::SinkError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ListSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<String>,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
}

/// Pub/Sub client, created once and shared for the process lifetime.
pub struct PubSubPublisher {
    http_client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl PubSubPublisher {
    /// Build from configuration, loading credentials from the configured path.
    ///
    /// With an emulator host set no credentials are read.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SinkError::Request(format!("failed to build HTTP client: {}", e)))?;

        let auth: Arc<dyn TokenProvider> = if config.emulator_host.is_some() {
            info!(base_url = %config.base_url(), "Publishing to Pub/Sub emulator without authentication");
            Arc::new(NoAuth)
        } else {
            let path = config.credentials_path.as_deref().ok_or_else(|| {
                SinkError::Credentials("no service account key configured".into())
            })?;
            let key = ServiceAccountKey::from_file(path)?;
            let provider = ServiceAccountTokenProvider::new(key, http_client.clone())?;
            info!(
                client_email = %provider.client_email(),
                "Loaded Pub/Sub service account credentials"
            );
            Arc::new(provider)
        };

        Ok(Self::with_token_provider(
            http_client,
            config.base_url(),
            auth,
        ))
    }

    /// Build with an explicit token provider.
    pub fn with_token_provider(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SinkError> {
        Ok(match self.auth.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn error_for(response: reqwest::Response, topic: &str) -> SinkError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        SinkError::from_status(status, topic, message)
    }
}

#[async_trait]
impl EventSink for PubSubPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, SinkError> {
        let url = format!("{}/v1/{}:publish", self.base_url, topic);
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&payload),
            }],
        };

        let response = self
            .authorized(self.http_client.post(&url))
            .await?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, topic).await);
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;

        parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| SinkError::InvalidResponse("no message id returned".into()))
    }

    async fn check_topic(&self, topic: &str) -> Result<usize, SinkError> {
        let url = format!("{}/v1/{}/subscriptions", self.base_url, topic);

        let response = self
            .authorized(self.http_client.get(&url))
            .await?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, topic).await);
        }

        let parsed: ListSubscriptionsResponse = response
            .json()
            .await
            .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;

        debug!(topic = %topic, subscriptions = ?parsed.subscriptions, "Topic subscriptions");
        Ok(parsed.subscriptions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOPIC: &str = "projects/my-project/topics/recentchange";

    struct StaticToken(&'static str);

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn token(&self) -> Result<Option<String>, SinkError> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn publisher(server: &MockServer) -> PubSubPublisher {
        PubSubPublisher::with_token_provider(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(StaticToken("ya29.test")),
        )
    }

    #[tokio::test]
    async fn test_publish_encodes_payload() {
        let server = MockServer::start().await;
        let payload = br#"{"schema":"/change/1.0","title":"X"}"#.to_vec();

        Mock::given(method("POST"))
            .and(path(format!("/v1/{}:publish", TOPIC)))
            .and(header("authorization", "Bearer ya29.test"))
            .and(body_json(serde_json::json!({
                "messages": [{"data": STANDARD.encode(&payload)}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"messageIds": ["123"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = publisher(&server).publish(TOPIC, payload).await.unwrap();
        assert_eq!(id, "123");
    }

    #[tokio::test]
    async fn test_publish_forbidden_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "User not authorized", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .publish(TOPIC, b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("User not authorized"));
    }

    #[tokio::test]
    async fn test_publish_unavailable_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .publish(TOPIC, b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_publish_missing_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .publish(TOPIC, b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_check_topic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/{}/subscriptions", TOPIC)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subscriptions": ["projects/my-project/subscriptions/bq-sink"]
            })))
            .mount(&server)
            .await;

        assert_eq!(publisher(&server).check_topic(TOPIC).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_check_topic_without_subscriptions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert_eq!(publisher(&server).check_topic(TOPIC).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_topic_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = publisher(&server).check_topic(TOPIC).await.unwrap_err();
        assert!(matches!(err, SinkError::TopicNotFound(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = SinkConfig {
            project: "p".into(),
            topic: "t".into(),
            ..SinkConfig::default()
        };
        let err = match PubSubPublisher::from_config(&config) {
            Err(e) => e,
            Ok(_) => panic!("expected missing credentials"),
        };
        assert!(matches!(err, SinkError::Credentials(_)));
    }

    #[test]
    fn test_from_config_emulator() {
        let config = SinkConfig {
            project: "p".into(),
            topic: "t".into(),
            emulator_host: Some("localhost:8085".into()),
            ..SinkConfig::default()
        };
        let publisher = PubSubPublisher::from_config(&config).unwrap();
        assert_eq!(publisher.base_url, "http://localhost:8085");
    }
}

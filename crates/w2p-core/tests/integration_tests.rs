//! End-to-end tests for w2p-core.
//!
//! A single wiremock server plays the event stream, the Pub/Sub REST API
//! and the OAuth token endpoint, so the real `SseSource` and
//! `PubSubPublisher` run against it through `IngestionEngine::new`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use w2p_core::engine::{ConnectionState, IngestionEngine};
use w2p_core::metrics::ErrorType;
use w2p_core::retry::RetryConfig;
use w2p_core::{Config, Error, SinkError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/v2/stream/recentchange";
const PUBLISH_PATH: &str = "/v1/projects/my-project/topics/recentchange:publish";
const SUBSCRIPTIONS_PATH: &str = "/v1/projects/my-project/topics/recentchange/subscriptions";

const WIKI_STREAM: &str = "\
:ok

event: message
id: [{\"topic\":\"eqiad.mediawiki.recentchange\",\"partition\":0,\"offset\":1}]
data: {\"$schema\":\"/mediawiki/recentchange/1.0.0\",\"title\":\"Main Page\",\"wiki\":\"enwiki\"}

event: message
data: not-json

event: message
data: {\"$schema\":\"/mediawiki/recentchange/1.0.0\",\"title\":\"Sandbox\",\"wiki\":\"dewiki\"}

";

fn base_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.source.url = format!("{}{}", server.uri(), STREAM_PATH);
    config.source.read_timeout_secs = 5;
    config.sink.project = "my-project".into();
    config.sink.topic = "recentchange".into();
    config.sink.retry = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(50), 2);
    config.reconnect = RetryConfig::new(Duration::from_millis(50), Duration::from_millis(200), 0);
    config
}

fn emulator_config(server: &MockServer) -> Config {
    let mut config = base_config(server);
    config.sink.emulator_host = Some(server.address().to_string());
    config
}

/// Write a service account key pointing its token endpoint at the mock server.
fn write_key_file(dir: &TempDir, server: &MockServer) -> PathBuf {
    let pem = include_str!("fixtures/test_rsa_private.pem");
    let key = json!({
        "type": "service_account",
        "client_email": "relay@my-project.iam.gserviceaccount.com",
        "private_key_id": "test-key",
        "private_key": pem,
        "token_uri": format!("{}/token", server.uri()),
    });
    let path = dir.path().join("key.json");
    std::fs::write(&path, key.to_string()).unwrap();
    path
}

async fn mount_stream(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_subscriptions(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SUBSCRIPTIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": ["projects/my-project/subscriptions/bigquery"]
        })))
        .mount(server)
        .await;
}

async fn mount_publish(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageIds": ["1"]})))
        .mount(server)
        .await;
}

/// Decoded payloads of every publish request the server received, in order.
async fn published_payloads(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == PUBLISH_PATH)
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            let data = body["messages"][0]["data"].as_str().unwrap();
            serde_json::from_slice(&STANDARD.decode(data).unwrap()).unwrap()
        })
        .collect()
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met within 10s");
}

#[tokio::test]
async fn test_relay_to_emulator() {
    let server = MockServer::start().await;
    mount_stream(&server, WIKI_STREAM).await;
    mount_subscriptions(&server).await;
    mount_publish(&server).await;

    let mut engine = IngestionEngine::new(emulator_config(&server)).await.unwrap();
    let metrics = engine.metrics();
    let shutdown = engine.shutdown_signal();
    let handle = tokio::spawn(async move { engine.run().await });

    eventually(|| {
        let metrics = metrics.clone();
        async move { metrics.published_total() >= 2 }
    })
    .await;
    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());

    let payloads = published_payloads(&server).await;
    // The stream is replayed on every reconnect; check the first pass
    assert_eq!(
        payloads[..2],
        [
            json!({"schema": "/mediawiki/recentchange/1.0.0", "title": "Main Page", "wiki": "enwiki"}),
            json!({"schema": "/mediawiki/recentchange/1.0.0", "title": "Sandbox", "wiki": "dewiki"}),
        ]
    );
    assert!(metrics.errors_by_type(ErrorType::Decode) >= 1);

    // Emulator mode sends no credentials
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests
        .iter()
        .all(|r| !r.headers.contains_key("authorization")));
}

#[tokio::test]
async fn test_relay_with_service_account() {
    let server = MockServer::start().await;
    mount_stream(&server, WIKI_STREAM).await;
    mount_subscriptions(&server).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.integration",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .and(header("authorization", "Bearer ya29.integration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageIds": ["7"]})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = base_config(&server);
    config.sink.credentials_path = Some(write_key_file(&dir, &server));

    let mut engine = IngestionEngine::new(config).await.unwrap();
    let metrics = engine.metrics();
    let shutdown = engine.shutdown_signal();
    let handle = tokio::spawn(async move { engine.run().await });

    eventually(|| {
        let metrics = metrics.clone();
        async move { metrics.published_total() >= 2 }
    })
    .await;
    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());

    // The cached token is reused for every publish; `expect(1)` is verified on drop
    assert_eq!(metrics.lost_total(), 0);
}

#[tokio::test]
async fn test_reconnects_after_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_stream(&server, WIKI_STREAM).await;
    mount_subscriptions(&server).await;
    mount_publish(&server).await;

    let mut engine = IngestionEngine::new(emulator_config(&server)).await.unwrap();
    let metrics = engine.metrics();
    let shutdown = engine.shutdown_signal();
    let handle = tokio::spawn(async move { engine.run().await });

    eventually(|| {
        let metrics = metrics.clone();
        async move { metrics.published_total() >= 1 }
    })
    .await;
    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());

    assert!(metrics.errors_by_type(ErrorType::Source) >= 2);
    assert!(metrics.connections_total() >= 1);
}

#[tokio::test]
async fn test_publish_forbidden_stops_relay() {
    let server = MockServer::start().await;
    mount_stream(&server, WIKI_STREAM).await;
    mount_subscriptions(&server).await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "User not authorized to perform this action.", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let mut engine = IngestionEngine::new(emulator_config(&server)).await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, Error::Sink(SinkError::Auth(_))));
    assert!(err.is_fatal());
    assert_eq!(engine.state(), ConnectionState::Stopped);
    assert!(!engine.health().is_operational());
}

#[tokio::test]
async fn test_missing_topic_fails_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SUBSCRIPTIONS_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Resource not found", "status": "NOT_FOUND"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut engine = IngestionEngine::new(emulator_config(&server)).await.unwrap();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, Error::Sink(SinkError::TopicNotFound(_))));
}

#[tokio::test]
async fn test_unreadable_credentials_rejected_at_startup() {
    let server = MockServer::start().await;
    let mut config = base_config(&server);
    config.sink.credentials_path = Some(PathBuf::from("/nonexistent/key.json"));

    match IngestionEngine::new(config).await {
        Err(Error::Sink(SinkError::Credentials(message))) => {
            assert!(!message.contains("/nonexistent"));
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("expected a credentials error"),
    }
}

//! Access tokens for the Pub/Sub API.
//!
//! Service account keys are exchanged for OAuth2 access tokens using the
//! JWT bearer grant: an RS256-signed assertion is posted to the key's
//! `token_uri`, and the returned token is cached until shortly before it
//! expires. Key material and the key file path are never logged.

use crate::error::SinkError;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// OAuth scope granting publish access.
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Supplies bearer tokens for sink requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, or `None` when requests go unauthenticated.
    async fn token(&self) -> Result<Option<String>, SinkError>;
}

/// No authentication (Pub/Sub emulator).
#[derive(Debug, Default, Clone)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Result<Option<String>, SinkError> {
        Ok(None)
    }
}

/// The subset of a service account key file we need.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

// Keep the private key out of debug output.
impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    pub fn from_file(path: &Path) -> Result<Self, SinkError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SinkError::Credentials(format!("cannot read key file: {}", e.kind())))?;
        Self::from_json(&content)
    }

    /// Parse key file contents.
    pub fn from_json(content: &str) -> Result<Self, SinkError> {
        serde_json::from_str(content)
            .map_err(|e| SinkError::Credentials(format!("malformed key file: {}", e)))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Service account token provider with caching.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http_client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    /// Create a provider from a parsed key. Fails if the private key is not RSA PEM.
    pub fn new(key: ServiceAccountKey, http_client: reqwest::Client) -> Result<Self, SinkError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SinkError::Credentials(format!("invalid private key: {}", e)))?;

        Ok(Self {
            key,
            encoding_key,
            http_client,
            cached: Mutex::new(None),
        })
    }

    /// Service account identity, safe to log.
    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn signed_assertion(&self, now: i64) -> Result<String, SinkError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let claims = Claims {
            iss: &self.key.client_email,
            scope: PUBSUB_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| SinkError::Credentials(format!("failed to sign assertion: {}", e)))
    }

    async fn fetch(&self) -> Result<CachedToken, SinkError> {
        let now = Utc::now().timestamp();
        let assertion = self.signed_assertion(now)?;

        let response = self
            .http_client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 401 | 403 => SinkError::Auth(format!(
                    "token exchange rejected (HTTP {}): {}",
                    status.as_u16(),
                    body
                )),
                code => SinkError::HttpStatus {
                    status: code,
                    message: format!("token exchange failed: {}", body),
                },
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SinkError::InvalidResponse(format!("token response: {}", e)))?;

        debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "Obtained Pub/Sub access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in,
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn token(&self) -> Result<Option<String>, SinkError> {
        let now = Utc::now().timestamp();
        let cached = self.cached.lock().clone();
        if let Some(cached) = cached {
            if cached.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(Some(cached.value));
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *self.cached.lock() = Some(fresh);
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/test_rsa_private.pem");

    fn test_key(token_uri: String) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "relay@my-project.iam.gserviceaccount.com".into(),
            private_key: TEST_KEY_PEM.into(),
            private_key_id: Some("key-1".into()),
            token_uri,
        }
    }

    #[test]
    fn test_key_from_json_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"type":"service_account","client_email":"a@b.c","private_key":"pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_key_debug_hides_private_key() {
        let key = test_key("https://oauth2.googleapis.com/token".into());
        let debug = format!("{:?}", key);
        assert!(debug.contains("relay@my-project"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_missing_key_file() {
        let err = ServiceAccountKey::from_file(Path::new("/nonexistent/key.json")).unwrap_err();
        assert!(err.is_fatal());
        assert!(!err.to_string().contains("/nonexistent"));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let mut key = test_key("https://oauth2.googleapis.com/token".into());
        key.private_key = "not a pem".into();
        let result = ServiceAccountTokenProvider::new(key, reqwest::Client::new());
        assert!(matches!(result, Err(SinkError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_token_exchange_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ServiceAccountTokenProvider::new(
            test_key(format!("{}/token", server.uri())),
            reqwest::Client::new(),
        )
        .unwrap();

        assert_eq!(provider.token().await.unwrap().as_deref(), Some("ya29.test"));
        // Second call is served from cache; `expect(1)` verifies on drop.
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("ya29.test"));
    }

    #[tokio::test]
    async fn test_token_exchange_rejected_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let provider = ServiceAccountTokenProvider::new(
            test_key(format!("{}/token", server.uri())),
            reqwest::Client::new(),
        )
        .unwrap();

        let err = provider.token().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_no_auth() {
        assert_eq!(NoAuth.token().await.unwrap(), None);
    }
}

//! Google service-account OAuth for Claude on Vertex AI.
//!
//! A signed RS256 assertion is exchanged at the key's `token_uri` for a bearer token.
//! Tokens are cached per service account and refreshed five minutes before expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{HttpRequest, HttpTransport};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Subset of a service-account key file needed to mint access tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Parses the JSON text of a service-account key.
    ///
    /// An empty object (the catalog default when no key is configured) is an auth error,
    /// which lets the router move on to the next deployment.
    pub fn from_json(text: &str) -> Result<Self, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::Auth {
            message: format!("invalid vertex service account credentials: {err}"),
        })
    }
}

/// 已缓存的访问令牌
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Process-wide token cache keyed by service-account email.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    inner: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached token or exchanges a fresh assertion for one.
    pub async fn access_token(
        &self,
        transport: &dyn HttpTransport,
        key: &ServiceAccountKey,
    ) -> Result<String, LLMError> {
        {
            let cache = self.inner.read().await;
            if let Some(token) = cache.get(&key.client_email) {
                if token.is_fresh() {
                    return Ok(token.token.clone());
                }
            }
        }

        let token = fetch_access_token(transport, key).await?;
        let value = token.token.clone();
        self.inner
            .write()
            .await
            .insert(key.client_email.clone(), token);
        Ok(value)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Builds the signed assertion sent to the token endpoint.
pub(crate) fn sign_assertion(key: &ServiceAccountKey, now: u64) -> Result<String, LLMError> {
    let claims = Claims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key =
        EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|err| LLMError::Auth {
            message: format!("invalid service account private key: {err}"),
        })?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key).map_err(|err| LLMError::Auth {
        message: format!("failed to sign service account assertion: {err}"),
    })
}

async fn fetch_access_token(
    transport: &dyn HttpTransport,
    key: &ServiceAccountKey,
) -> Result<AccessToken, LLMError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        #[serde(default = "default_expires_in")]
        expires_in: u64,
    }

    fn default_expires_in() -> u64 {
        ASSERTION_LIFETIME_SECS
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let assertion = sign_assertion(key, now)?;

    debug!(
        client_email = %key.client_email,
        token_uri = %key.token_uri,
        "exchanging service account assertion"
    );
    let request = HttpRequest::post_form(
        key.token_uri.clone(),
        &[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)],
    );
    let response = transport.send(request).await?;
    let (status, success) = (response.status, response.is_success());
    let text = response.into_string()?;
    if !success {
        return Err(LLMError::Auth {
            message: format!("token exchange failed with status {status}: {text}"),
        });
    }
    let parsed: TokenResponse = serde_json::from_str(&text).map_err(|err| LLMError::Auth {
        message: format!("failed to parse token response: {err}"),
    })?;

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
    })
}

//! Cloud KMS adapter over the REST API.
//!
//! Encrypts with `POST /v1/{key}:encrypt` and decrypts with
//! `POST /v1/{key}:decrypt`. The service already returns base64 ciphertext,
//! which is stored verbatim.

use super::{Ciphertext, CipherError, SecretCipher};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

/// Public Cloud KMS endpoint
pub const DEFAULT_KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";

/// Compute metadata server token endpoint (default service account)
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata tokens this long before they expire
const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Upper bound on how long a metadata token is cached
const MAX_TOKEN_LIFETIME_SECONDS: i64 = 86_400;

/// Identifies one crypto key. All four parts are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KmsKeyRef {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub key_ring: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
}

impl KmsKeyRef {
    /// Full resource name, or `None` if any part is missing or empty.
    pub fn resource_name(&self) -> Option<String> {
        let part = |p: &Option<String>| p.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        Some(format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            part(&self.project)?,
            part(&self.location)?,
            part(&self.key_ring)?,
            part(&self.key_name)?
        ))
    }
}

/// Where the bearer token for KMS calls comes from.
#[derive(Clone)]
pub enum TokenSource {
    /// Fixed token from configuration
    Static(String),
    /// Fetched from the compute metadata server and cached until near expiry
    Metadata { url: String },
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(<redacted>)"),
            TokenSource::Metadata { url } => f.debug_struct("Metadata").field("url", url).finish(),
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    #[serde(default)]
    plaintext: String,
}

/// Cipher backed by a Cloud KMS symmetric key.
///
/// The HTTP client is created lazily on first use, at most once, even when
/// several requests arrive concurrently.
pub struct KmsCipher {
    key: KmsKeyRef,
    endpoint: String,
    token_source: TokenSource,
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
    cached_token: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for KmsCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsCipher")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("token_source", &self.token_source)
            .finish()
    }
}

impl KmsCipher {
    pub fn new(key: KmsKeyRef, token_source: TokenSource, timeout: Duration) -> Self {
        Self {
            key,
            endpoint: DEFAULT_KMS_ENDPOINT.to_string(),
            token_source,
            timeout,
            client: OnceCell::new(),
            cached_token: RwLock::new(None),
        }
    }

    /// Point at a different KMS endpoint (for testing with a mock server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn key(&self) -> &KmsKeyRef {
        &self.key
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .user_agent(concat!("ghlink/", env!("CARGO_PKG_VERSION")))
                    .build()
            })
            .await
            .context("Failed to build KMS HTTP client")
    }

    async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let url = match &self.token_source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url } => url,
        };

        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.cached_token.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        debug!("Fetching KMS access token from metadata server");
        let response = client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach metadata server")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Metadata server returned status {}",
                response.status()
            ));
        }

        let body: MetadataTokenResponse = response
            .json()
            .await
            .context("Failed to parse metadata token response")?;

        let lifetime = body
            .expires_in
            .unwrap_or(300)
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECONDS)
            .clamp(0, MAX_TOKEN_LIFETIME_SECONDS);
        *slot = Some(CachedToken {
            token: body.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        });

        Ok(body.access_token)
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        key_name: &str,
        operation: &str,
        body: &B,
    ) -> Result<T> {
        let client = self.client().await?;
        let token = self.access_token(client).await?;
        let url = format!("{}/v1/{}:{}", self.endpoint, key_name, operation);

        debug!(key = %key_name, operation = operation, "Calling KMS");
        let response = client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send KMS {} request", operation))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "KMS {} failed with status {}: {}",
                operation,
                status,
                detail
            ));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse KMS {} response", operation))
    }
}

#[async_trait]
impl SecretCipher for KmsCipher {
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError> {
        let key_name = self.key.resource_name().ok_or_else(|| {
            CipherError::EncryptionUnavailable(
                "KMS key identifier incomplete (project, location, key ring, key name)".to_string(),
            )
        })?;

        let request = EncryptRequest {
            plaintext: BASE64.encode(plaintext.as_bytes()),
        };
        let response: EncryptResponse = self
            .call(&key_name, "encrypt", &request)
            .await
            .map_err(|e| CipherError::EncryptionUnavailable(format!("{:#}", e)))?;

        if response.ciphertext.is_empty() {
            return Err(CipherError::EncryptionUnavailable(
                "KMS returned empty ciphertext".to_string(),
            ));
        }

        Ok(Ciphertext::new(response.ciphertext))
    }

    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError> {
        let key_name = self.key.resource_name().ok_or_else(|| {
            CipherError::DecryptionUnavailable(
                "KMS key identifier incomplete (project, location, key ring, key name)".to_string(),
            )
        })?;

        let request = DecryptRequest {
            ciphertext: ciphertext.as_str(),
        };
        let response: DecryptResponse = self
            .call(&key_name, "decrypt", &request)
            .await
            .map_err(|e| CipherError::DecryptionUnavailable(format!("{:#}", e)))?;

        let bytes = BASE64
            .decode(response.plaintext.as_bytes())
            .map_err(|e| CipherError::DecryptionUnavailable(format!("invalid plaintext encoding: {}", e)))?;

        String::from_utf8(bytes)
            .map_err(|_| CipherError::DecryptionUnavailable("plaintext is not valid UTF-8".to_string()))
    }
}

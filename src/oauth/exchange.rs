//! OAuth token exchange and profile lookup against GitHub.

use super::{AccessToken, ExchangeError, GitHubProfile, OAuthExchanger, OAuthProviderConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// OAuth token response. GitHub answers a bad code with 200 and an `error`
/// body, so every field is optional.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Subset of `GET /user`
#[derive(Deserialize, Debug)]
struct UserResponse {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    id: Option<Value>,
}

/// HTTP adapter for the GitHub OAuth endpoints and REST API.
pub struct GitHubOAuthClient {
    http_client: reqwest::Client,
    token_url: String,
    api_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl GitHubOAuthClient {
    /// Build a client from provider configuration with a per-call timeout.
    pub fn new(config: &OAuthProviderConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ghlink/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            token_url: config.token_url.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id().map(str::to_string),
            client_secret: config.client_secret().map(str::to_string),
        })
    }
}

#[async_trait]
impl OAuthExchanger for GitHubOAuthClient {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken, ExchangeError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(ExchangeError::ExchangeFailed(
                "OAuth client credentials not configured".to_string(),
            ));
        };

        let form_data = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        tracing::debug!("Exchanging authorization code for token at {}", self.token_url);

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form_data)
            .send()
            .await
            .map_err(|e| {
                ExchangeError::ExchangeFailed(format!("Failed to send token exchange request: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExchangeError::ExchangeFailed(format!(
                "Token exchange failed with status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            ExchangeError::ExchangeFailed(format!("Failed to parse token response: {}", e))
        })?;

        match token_response.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(AccessToken::new(token)),
            None => Err(ExchangeError::ExchangeFailed(format!(
                "Access token not in response (error: {}, description: {})",
                token_response.error.as_deref().unwrap_or("none"),
                token_response.error_description.as_deref().unwrap_or("none")
            ))),
        }
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<GitHubProfile, ExchangeError> {
        let url = format!("{}/user", self.api_base);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("token {}", token.secret()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| {
                ExchangeError::ProfileFetchFailed(format!("Failed to send profile request: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ExchangeError::ProfileFetchFailed(format!(
                "GitHub API error: {}",
                response.status()
            )));
        }

        let user: UserResponse = response.json().await.map_err(|e| {
            ExchangeError::ProfileFetchFailed(format!("Failed to parse profile response: {}", e))
        })?;

        let login = user.login.filter(|l| !l.is_empty()).ok_or_else(|| {
            ExchangeError::ProfileFetchFailed("login missing from profile response".to_string())
        })?;

        let external_id = match user.id {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => {
                return Err(ExchangeError::ProfileFetchFailed(
                    "id missing from profile response".to_string(),
                ))
            }
        };

        Ok(GitHubProfile { login, external_id })
    }
}

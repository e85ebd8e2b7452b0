//! GitHub OAuth 2.0 provider calls.
//!
//! Two outbound calls, one attempt each:
//! 1. Exchange the authorization code for an access token
//! 2. Look up the profile that owns the token

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

mod exchange;
mod provider;

pub use exchange::GitHubOAuthClient;
pub use provider::{
    encode_query_value, OAuthProviderConfig, GITHUB_API_BASE, GITHUB_AUTH_URL, GITHUB_SCOPES,
    GITHUB_TOKEN_URL,
};

/// Plaintext provider access token. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Provider account the token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubProfile {
    pub login: String,
    /// Numeric account id rendered as a decimal string
    pub external_id: String,
}

/// Provider call failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),
}

/// Outbound calls to the OAuth provider.
#[async_trait]
pub trait OAuthExchanger: Send + Sync {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken, ExchangeError>;

    async fn fetch_profile(&self, token: &AccessToken) -> Result<GitHubProfile, ExchangeError>;
}

//! GitHub OAuth application configuration.

use serde::{Deserialize, Serialize};

pub const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Read profile + email
pub const GITHUB_SCOPES: [&str; 2] = ["read:user", "user:email"];

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// OAuth authorization endpoint URL
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// REST API base (profile lookup)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Requested OAuth scopes
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Client ID; connect fails with a configuration error when unset
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret; callback fails with a configuration error when unset
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_auth_url() -> String {
    GITHUB_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GITHUB_TOKEN_URL.to_string()
}

fn default_api_base() -> String {
    GITHUB_API_BASE.to_string()
}

fn default_scopes() -> Vec<String> {
    GITHUB_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base: default_api_base(),
            scopes: default_scopes(),
            client_id: None,
            client_secret: None,
        }
    }
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("api_base", &self.api_base)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OAuthProviderConfig {
    /// Configured, non-empty client id.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Configured, non-empty client secret.
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, client_id: &str, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}",
            self.auth_url,
            encode_query_value(client_id),
            encode_query_value(redirect_uri),
            encode_query_value(&scopes),
            encode_query_value(state)
        )
    }
}

/// Percent-encode a query parameter value.
///
/// `:` and `/` are legal inside a query component and are left as-is so
/// callback URLs stay readable in the authorization link.
pub fn encode_query_value(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%3A", ":")
        .replace("%2F", "/")
}

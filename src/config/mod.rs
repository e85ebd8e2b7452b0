use crate::cipher::{KmsKeyRef, DEFAULT_KMS_ENDPOINT, DEFAULT_METADATA_TOKEN_URL};
use crate::oauth::OAuthProviderConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete ghlink configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub kms: KmsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for each outbound HTTP call (GitHub, key service)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

/// GitHub OAuth app and redirect targets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    #[serde(flatten)]
    pub provider: OAuthProviderConfig,
    /// Frontend base URL (callback redirects, popup messaging)
    #[serde(default)]
    pub frontend_url: Option<String>,
    /// Externally reachable base URL of this service
    #[serde(default)]
    pub callback_base_url: Option<String>,
}

/// Token encryption key
#[derive(Clone, Deserialize)]
pub struct KmsConfig {
    #[serde(flatten)]
    pub key: KmsKeyRef,
    #[serde(default = "default_kms_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_metadata_token_url")]
    pub metadata_token_url: String,
    /// Static bearer token; the metadata server is used when unset
    #[serde(default)]
    pub access_token: Option<String>,
    /// Base64 32-byte key; replaces the key service with local AES-256-GCM
    #[serde(default)]
    pub local_key: Option<String>,
}

fn default_kms_endpoint() -> String {
    DEFAULT_KMS_ENDPOINT.to_string()
}

fn default_metadata_token_url() -> String {
    DEFAULT_METADATA_TOKEN_URL.to_string()
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            key: KmsKeyRef::default(),
            endpoint: default_kms_endpoint(),
            metadata_token_url: default_metadata_token_url(),
            access_token: None,
            local_key: None,
        }
    }
}

impl std::fmt::Debug for KmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsConfig")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("metadata_token_url", &self.metadata_token_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("local_key", &self.local_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "connections.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Cross-origin configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides on top of file values.
    ///
    /// `lookup` maps a variable name to its value; blank values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GITHUB_CLIENT_ID") {
            self.github.provider.client_id = Some(v);
        }
        if let Some(v) = var("GITHUB_CLIENT_SECRET") {
            self.github.provider.client_secret = Some(v);
        }
        if let Some(v) = var("FRONTEND_URL") {
            self.github.frontend_url = Some(v);
        }
        if let Some(v) = var("API_GATEWAY_BASE_URL") {
            self.github.callback_base_url = Some(v);
        }
        if let Some(v) = var("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = v;
        }

        if let Some(v) = var("GOOGLE_CLOUD_PROJECT") {
            self.kms.key.project = Some(v);
        }
        if let Some(v) = var("KMS_LOCATION") {
            self.kms.key.location = Some(v);
        }
        if let Some(v) = var("KMS_KEY_RING") {
            self.kms.key.key_ring = Some(v);
        }
        if let Some(v) = var("KMS_KEY_NAME") {
            self.kms.key.key_name = Some(v);
        }
        if let Some(v) = var("KMS_ACCESS_TOKEN") {
            self.kms.access_token = Some(v);
        }
        if let Some(v) = var("GHLINK_LOCAL_KEY") {
            self.kms.local_key = Some(v);
        }

        if let Some(v) = var("GHLINK_PORT") {
            self.server.port = v
                .parse()
                .with_context(|| format!("GHLINK_PORT must be a valid port number, got '{}'", v))?;
        }
        if let Some(v) = var("GHLINK_HTTP_TIMEOUT_SECONDS") {
            self.server.http_timeout_seconds = v.parse().with_context(|| {
                format!("GHLINK_HTTP_TIMEOUT_SECONDS must be a number, got '{}'", v)
            })?;
        }
        if let Some(v) = var("GHLINK_STORE_PATH") {
            self.store.path = v;
        }

        Ok(())
    }

    /// File (if `GHLINK_CONFIG` is set) plus process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("GHLINK_CONFIG") {
            Ok(path) if !path.is_empty() => load_config(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.http_timeout_seconds, 10);
        assert_eq!(config.store.path, "connections.db");
        assert_eq!(config.cors.allowed_origins, "*");
        assert_eq!(config.kms.endpoint, DEFAULT_KMS_ENDPOINT);
        assert!(config.github.provider.client_id.is_none());
        assert!(config.kms.key.resource_name().is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            port = 9090
            http_timeout_seconds = 5

            [github]
            client_id = "abc"
            frontend_url = "https://app.example"
            callback_base_url = "https://gw.example"

            [kms]
            project = "proj"
            location = "global"
            key_ring = "ring"
            key_name = "github-tokens"

            [store]
            path = "/var/lib/ghlink/connections.db"

            [cors]
            allowed_origins = "https://app.example"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.github.provider.client_id(), Some("abc"));
        assert_eq!(
            config.github.provider.token_url,
            "https://github.com/login/oauth/access_token"
        );
        assert_eq!(
            config.github.callback_base_url.as_deref(),
            Some("https://gw.example")
        );
        assert_eq!(
            config.kms.key.resource_name().as_deref(),
            Some("projects/proj/locations/global/keyRings/ring/cryptoKeys/github-tokens")
        );
        assert_eq!(config.store.path, "/var/lib/ghlink/connections.db");
        assert_eq!(config.cors.allowed_origins, "https://app.example");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [server]
            port = 3000
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.http_timeout_seconds, 10); // Default
        assert_eq!(config.store.path, "connections.db"); // Default
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("GITHUB_CLIENT_ID", "abc"),
                ("GITHUB_CLIENT_SECRET", "shh"),
                ("FRONTEND_URL", "https://app.example"),
                ("API_GATEWAY_BASE_URL", "https://gw.example"),
                ("CORS_ALLOWED_ORIGINS", "https://app.example"),
                ("GOOGLE_CLOUD_PROJECT", "proj"),
                ("KMS_LOCATION", "global"),
                ("KMS_KEY_RING", "ring"),
                ("KMS_KEY_NAME", "key"),
                ("GHLINK_PORT", "9000"),
                ("GHLINK_STORE_PATH", "/tmp/c.db"),
            ]))
            .unwrap();

        assert_eq!(config.github.provider.client_id(), Some("abc"));
        assert_eq!(config.github.provider.client_secret(), Some("shh"));
        assert_eq!(config.github.frontend_url.as_deref(), Some("https://app.example"));
        assert_eq!(config.cors.allowed_origins, "https://app.example");
        assert!(config.kms.key.resource_name().is_some());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.path, "/tmp/c.db");
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("GITHUB_CLIENT_ID", ""), ("CORS_ALLOWED_ORIGINS", "  ")]))
            .unwrap();

        assert!(config.github.provider.client_id.is_none());
        assert_eq!(config.cors.allowed_origins, "*");
    }

    #[test]
    fn test_invalid_port() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("GHLINK_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("GHLINK_PORT"));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[github]\nclient_id = \"from-file\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.github.provider.client_id(), Some("from-file"));

        assert!(load_config("/nonexistent/ghlink.toml").is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("GITHUB_CLIENT_SECRET", "super-secret"),
                ("KMS_ACCESS_TOKEN", "ya29.token"),
            ]))
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("ya29.token"));
    }
}

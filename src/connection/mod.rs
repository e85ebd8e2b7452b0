//! GitHub connection lifecycle for one user.
//!
//! Implements the authorization code flow with encrypted token storage:
//! 1. `connect` builds the GitHub authorization URL (`state` = user id)
//! 2. User authorizes on GitHub
//! 3. GitHub redirects to `/github/callback?code&state`
//! 4. `callback` exchanges the code, encrypts the token, fetches the profile
//!    and only then writes the connection record
//! 5. `status` and `disconnect` read and clear that record
//!
//! States per user: Disconnected (no record, or `githubConnected=false`) and
//! Connected. Every fallible dependency call runs before the single store
//! write of an operation, so a failure never leaves a partial record.

use crate::auth::ClaimSet;
use crate::cipher::{Ciphertext, SecretCipher};
use crate::oauth::{ExchangeError, OAuthExchanger, OAuthProviderConfig};
use crate::store::{fields, ConnectionStore, Document, StoreError, UserConnectionRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};


/// Path GitHub redirects back to, appended to the callback base URL
pub const CALLBACK_PATH: &str = "/github/callback";

/// Profile field carrying the decrypted token on the profile-read path
pub const DECRYPTED_TOKEN_FIELD: &str = "githubAccessToken";

/// Profile field set when the stored token could not be decrypted
pub const DECRYPTION_ERROR_FIELD: &str = "githubAccessTokenError";

/// Deployment settings the flow validates on every call.
#[derive(Debug, Clone, Default)]
pub struct FlowSettings {
    pub provider: OAuthProviderConfig,
    /// Externally reachable base URL, e.g. `https://gw.example`
    pub callback_base_url: Option<String>,
}

impl FlowSettings {
    /// Full callback URL, or `None` if no base URL is configured.
    pub fn callback_url(&self) -> Option<String> {
        self.callback_base_url
            .as_deref()
            .map(|base| base.trim_end_matches('/'))
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}{}", base, CALLBACK_PATH))
    }
}

/// Query parameters GitHub sends to the callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Flow failures. `Display` is the caller-visible message; the payload is
/// diagnostic detail for logs and tests.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    #[error("Missing required parameters")]
    MissingParameters,
    #[error("GitHub authorization was denied")]
    AuthorizationDenied(String),
    #[error("Server configuration error")]
    Configuration(String),
    #[error("Could not retrieve access token from GitHub")]
    TokenExchangeFailed(String),
    #[error("A security error occurred during processing")]
    EncryptionFailed(String),
    #[error("Could not retrieve user profile from GitHub")]
    ProfileFetchFailed(String),
    #[error("An internal error occurred")]
    StoreUnavailable(String),
}

impl FlowError {
    /// Stable code used as `github_error` on callback redirects.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::MissingParameters => "missing_params",
            FlowError::AuthorizationDenied(_) => "authorization_denied",
            FlowError::Configuration(_) => "config_error",
            FlowError::TokenExchangeFailed(_) => "token_exchange_failed",
            FlowError::EncryptionFailed(_) => "encryption_failed",
            FlowError::ProfileFetchFailed(_) => "user_fetch_failed",
            FlowError::StoreUnavailable(_) => "internal_error",
        }
    }
}

/// Result of a successful callback
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedAccount {
    pub user_id: String,
    pub login: String,
    pub external_id: String,
}

/// Connection status as reported to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "githubId", skip_serializing_if = "Option::is_none")]
    pub github_id: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            username: None,
            github_id: None,
        }
    }
}

/// Outcome of a disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    AlreadyDisconnected,
}

/// Orchestrates the GitHub connection operations over injected collaborators.
pub struct ConnectionFlow {
    settings: FlowSettings,
    exchanger: Arc<dyn OAuthExchanger>,
    cipher: Arc<dyn SecretCipher>,
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionFlow {
    pub fn new(
        settings: FlowSettings,
        exchanger: Arc<dyn OAuthExchanger>,
        cipher: Arc<dyn SecretCipher>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        Self {
            settings,
            exchanger,
            cipher,
            store,
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Build the GitHub authorization URL for the caller.
    ///
    /// Pure URL construction: no store or provider call happens here.
    pub fn connect(&self, claims: &ClaimSet) -> Result<String, FlowError> {
        let user_id = &claims.user_id;

        let Some(client_id) = self.settings.provider.client_id() else {
            error!(user_id = %user_id, "GitHub client id not configured");
            return Err(FlowError::Configuration(
                "GitHub client id not configured".to_string(),
            ));
        };

        let Some(callback_url) = self.settings.callback_url() else {
            error!(user_id = %user_id, "Callback base URL not configured");
            return Err(FlowError::Configuration(
                "Callback base URL not configured".to_string(),
            ));
        };

        let auth_url = self
            .settings
            .provider
            .build_auth_url(client_id, user_id, &callback_url);

        info!(user_id = %user_id, "Built GitHub authorization URL");
        Ok(auth_url)
    }

    /// Complete the OAuth round trip and persist the encrypted token.
    ///
    /// `state` is taken as the user id as-is; it is not checked against any
    /// stored value.
    pub async fn callback(&self, params: CallbackParams) -> Result<ConnectedAccount, FlowError> {
        if let Some(denied) = params.error.filter(|e| !e.is_empty()) {
            let description = params
                .error_description
                .unwrap_or_else(|| "Unknown error".to_string());
            warn!(
                error = %denied,
                description = %description,
                "GitHub authorization failed"
            );
            return Err(FlowError::AuthorizationDenied(format!(
                "{}: {}",
                denied, description
            )));
        }

        let code = params.code.filter(|c| !c.is_empty());
        let state = params.state.filter(|s| !s.is_empty());
        let (Some(code), Some(user_id)) = (code, state) else {
            warn!("Callback missing code or state");
            return Err(FlowError::MissingParameters);
        };

        debug!(user_id = %user_id, "Handling GitHub callback");

        let provider = &self.settings.provider;
        let (Some(_), Some(_), Some(redirect_uri)) = (
            provider.client_id(),
            provider.client_secret(),
            self.settings.callback_url(),
        ) else {
            error!(
                user_id = %user_id,
                "GitHub OAuth credentials or callback base URL not configured"
            );
            return Err(FlowError::Configuration(
                "GitHub OAuth credentials or callback base URL not configured".to_string(),
            ));
        };

        let token = self
            .exchanger
            .exchange_code_for_token(&code, &redirect_uri)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, error = %e, "Token exchange failed");
                match e {
                    ExchangeError::ExchangeFailed(msg) | ExchangeError::ProfileFetchFailed(msg) => {
                        FlowError::TokenExchangeFailed(msg)
                    }
                }
            })?;

        let ciphertext = self.cipher.encrypt(token.secret()).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to encrypt GitHub access token");
            FlowError::EncryptionFailed(e.to_string())
        })?;

        let profile = self.exchanger.fetch_profile(&token).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to fetch GitHub profile");
            FlowError::ProfileFetchFailed(e.to_string())
        })?;
        drop(token);

        let update = connected_fields(&ciphertext, &profile.login, &profile.external_id);
        self.store.upsert_merge(&user_id, update).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to store GitHub connection");
            FlowError::StoreUnavailable(e.to_string())
        })?;

        info!(
            user_id = %user_id,
            github_login = %profile.login,
            "GitHub connected, token stored encrypted"
        );

        Ok(ConnectedAccount {
            user_id,
            login: profile.login,
            external_id: profile.external_id,
        })
    }

    /// Report whether the user has a GitHub connection.
    pub async fn status(&self, user_id: &str) -> Result<ConnectionStatus, FlowError> {
        let record = self.read_record(user_id, "status").await?;

        match record {
            Some(record) if record.is_connected() => {
                debug!(user_id = %user_id, github_login = ?record.github_login, "GitHub connected");
                Ok(ConnectionStatus {
                    connected: true,
                    username: record.github_login,
                    github_id: record.github_id,
                })
            }
            Some(record) if record.github_connected => {
                warn!(user_id = %user_id, "Connection flag set but fields incomplete");
                Ok(ConnectionStatus::disconnected())
            }
            _ => {
                debug!(user_id = %user_id, "GitHub not connected");
                Ok(ConnectionStatus::disconnected())
            }
        }
    }

    /// Clear the connection. Idempotent: a second call is a no-op.
    pub async fn disconnect(&self, user_id: &str) -> Result<DisconnectOutcome, FlowError> {
        let record = self.read_record(user_id, "disconnect").await?;

        if !record.as_ref().is_some_and(|r| r.has_connection_data()) {
            info!(user_id = %user_id, "No active GitHub connection to disconnect");
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        }

        let mut set = Document::new();
        set.insert(fields::GITHUB_CONNECTED.to_string(), Value::Bool(false));
        set.insert(fields::LAST_UPDATED.to_string(), timestamp());

        match self
            .store
            .update_fields(user_id, set, &fields::CONNECTION_FIELDS)
            .await
        {
            Ok(()) => {
                info!(user_id = %user_id, "GitHub disconnected");
                Ok(DisconnectOutcome::Disconnected)
            }
            Err(StoreError::NotFound(_)) => {
                info!(user_id = %user_id, "Record vanished before disconnect");
                Ok(DisconnectOutcome::AlreadyDisconnected)
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to disconnect GitHub");
                Err(FlowError::StoreUnavailable(e.to_string()))
            }
        }
    }

    /// The caller's whole user document with the stored token decrypted.
    ///
    /// This is the only operation that turns ciphertext back into a token.
    /// A decryption failure is reported inside the document, not as an error.
    pub async fn read_profile(&self, user_id: &str) -> Result<Option<Document>, FlowError> {
        let document = self.store.get_document(user_id).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to read user profile");
            FlowError::StoreUnavailable(e.to_string())
        })?;

        let Some(mut document) = document else {
            return Ok(None);
        };

        let Some(Value::String(encoded)) =
            document.remove(fields::GITHUB_ACCESS_TOKEN_CIPHERTEXT)
        else {
            return Ok(Some(document));
        };

        match self.cipher.decrypt(&Ciphertext::new(encoded)).await {
            Ok(token) => {
                debug!(user_id = %user_id, "Decrypted GitHub access token for profile read");
                document.insert(DECRYPTED_TOKEN_FIELD.to_string(), Value::String(token));
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to decrypt GitHub access token");
                document.insert(DECRYPTED_TOKEN_FIELD.to_string(), Value::Null);
                document.insert(
                    DECRYPTION_ERROR_FIELD.to_string(),
                    Value::String("decryption_failed".to_string()),
                );
            }
        }

        Ok(Some(document))
    }

    async fn read_record(
        &self,
        user_id: &str,
        operation: &'static str,
    ) -> Result<Option<UserConnectionRecord>, FlowError> {
        self.store.get(user_id).await.map_err(|e| {
            error!(
                user_id = %user_id,
                operation = operation,
                error = %e,
                "Failed to read GitHub connection"
            );
            FlowError::StoreUnavailable(e.to_string())
        })
    }
}

fn timestamp() -> Value {
    serde_json::to_value(Utc::now()).unwrap_or(Value::Null)
}

/// Fields written by a successful callback.
fn connected_fields(ciphertext: &Ciphertext, login: &str, external_id: &str) -> Document {
    let mut update = Document::new();
    update.insert(
        fields::GITHUB_ACCESS_TOKEN_CIPHERTEXT.to_string(),
        Value::String(ciphertext.as_str().to_string()),
    );
    update.insert(fields::GITHUB_LOGIN.to_string(), Value::String(login.to_string()));
    update.insert(
        fields::GITHUB_ID.to_string(),
        Value::String(external_id.to_string()),
    );
    update.insert(fields::GITHUB_CONNECTED.to_string(), Value::Bool(true));
    update.insert(fields::LAST_UPDATED.to_string(), timestamp());
    update
}

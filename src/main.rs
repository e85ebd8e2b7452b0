use anyhow::{Context, Result};
use ghlink::api::{create_app, AppState, CorsSettings};
use ghlink::auth::GatewayClaimExtractor;
use ghlink::cipher::{KmsCipher, LocalKeyCipher, SecretCipher, TokenSource};
use ghlink::config::{AppConfig, KmsConfig};
use ghlink::connection::{ConnectionFlow, FlowSettings};
use ghlink::oauth::GitHubOAuthClient;
use ghlink::store::SqliteConnectionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghlink=info".into()),
        )
        .init();

    info!("ghlink starting...");

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let timeout = Duration::from_secs(config.server.http_timeout_seconds);

    info!(
        port = config.server.port,
        store_path = %config.store.path,
        callback_base_url = ?config.github.callback_base_url,
        frontend_url = ?config.github.frontend_url,
        "Configuration loaded"
    );

    if config.github.provider.client_id().is_none() {
        warn!("GITHUB_CLIENT_ID not set; connect and callback will report a configuration error");
    }

    let cipher = build_cipher(&config.kms, timeout)?;

    // Opened on first use
    let store = Arc::new(SqliteConnectionStore::new(&config.store.path));

    let exchanger = Arc::new(
        GitHubOAuthClient::new(&config.github.provider, timeout)
            .context("Failed to build GitHub HTTP client")?,
    );

    let flow = Arc::new(ConnectionFlow::new(
        FlowSettings {
            provider: config.github.provider.clone(),
            callback_base_url: config.github.callback_base_url.clone(),
        },
        exchanger,
        cipher,
        store,
    ));

    let cors = CorsSettings::new(&config.cors.allowed_origins)
        .context("CORS_ALLOWED_ORIGINS is not a valid header value")?;

    let state = AppState {
        flow,
        extractor: Arc::new(GatewayClaimExtractor),
        frontend_url: config.github.frontend_url.clone(),
    };
    let router = create_app(state, cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind API port")?;
    info!(port = config.server.port, "ghlink API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("ghlink stopped");

    Ok(())
}

/// Local key when configured, otherwise the managed key service.
fn build_cipher(kms: &KmsConfig, timeout: Duration) -> Result<Arc<dyn SecretCipher>> {
    if let Some(local_key) = kms.local_key.as_deref() {
        warn!("GHLINK_LOCAL_KEY set; encrypting tokens with a local key instead of KMS");
        let cipher = LocalKeyCipher::new(local_key)
            .context("GHLINK_LOCAL_KEY must be a base64-encoded 32-byte key")?;
        return Ok(Arc::new(cipher));
    }

    match kms.key.resource_name() {
        Some(name) => info!(key = %name, "Using KMS key for token encryption"),
        None => warn!("KMS key not fully configured; token encryption will fail"),
    }

    let token_source = match kms.access_token.clone() {
        Some(token) => TokenSource::Static(token),
        None => TokenSource::Metadata {
            url: kms.metadata_token_url.clone(),
        },
    };

    let cipher = KmsCipher::new(kms.key.clone(), token_source, timeout).with_endpoint(&kms.endpoint);
    Ok(Arc::new(cipher))
}

//! GitHub connection endpoints.
//!
//! - `GET /github/connect`: authorization URL for the caller
//! - `GET /github/callback`: OAuth redirect target (browser, not API client)
//! - `GET /github/status`: connection status for the caller
//! - `DELETE /github/disconnect`: clear the caller's connection

use super::{AppError, AppState};
use crate::connection::{CallbackParams, ConnectionStatus, DisconnectOutcome, FlowError};
use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{delete, get},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Frontend page that renders callback errors
pub const SETTINGS_PATH: &str = "/auth/settings";

/// Connect response
#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    #[serde(rename = "redirectUrl")]
    pub redirect_url: String,
}

/// Disconnect response
#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub message: String,
}

/// Create GitHub connection router
pub fn create_github_router(state: AppState) -> Router {
    Router::new()
        .route("/github/connect", get(github_connect))
        .route("/github/callback", get(github_callback))
        .route("/github/status", get(github_status))
        .route("/github/disconnect", delete(github_disconnect))
        .with_state(Arc::new(state))
}

/// GET /github/connect
///
/// Returns the GitHub authorization URL; the frontend opens it in a popup.
async fn github_connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConnectResponse>, AppError> {
    let claims = state.claims(&headers)?;
    let redirect_url = state.flow.connect(&claims)?;

    Ok(Json(ConnectResponse { redirect_url }))
}

/// GET /github/callback
///
/// Success renders a page that notifies `window.opener` and closes itself.
/// Failures redirect to the frontend settings page with a `github_error` code.
async fn github_callback(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    debug!("GitHub callback received");

    let result = match parse_callback_query(query.as_deref()) {
        Ok(params) => state.flow.callback(params).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(_) => Html(success_page(state.frontend_base())).into_response(),
        Err(err) => Redirect::temporary(&error_redirect(state.frontend_base(), &err)).into_response(),
    }
}

/// GET /github/status
async fn github_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConnectionStatus>, AppError> {
    let claims = state.claims(&headers)?;
    let status = state.flow.status(&claims.user_id).await?;

    Ok(Json(status))
}

/// DELETE /github/disconnect
///
/// Idempotent: succeeds whether or not a connection existed.
async fn github_disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let claims = state.claims(&headers)?;

    let message = match state.flow.disconnect(&claims.user_id).await? {
        DisconnectOutcome::Disconnected => "GitHub disconnected successfully.",
        DisconnectOutcome::AlreadyDisconnected => "No active GitHub connection to disconnect.",
    };

    Ok(Json(DisconnectResponse {
        message: message.to_string(),
    }))
}

/// Parse the callback query string. A query that does not decode (for
/// example a repeated `code`) is reported as missing parameters.
pub fn parse_callback_query(query: Option<&str>) -> Result<CallbackParams, FlowError> {
    serde_urlencoded::from_str(query.unwrap_or("")).map_err(|e| {
        warn!(error = %e, "Malformed callback query");
        FlowError::MissingParameters
    })
}

/// Frontend URL carrying the error code for a failed callback.
pub fn error_redirect(frontend_base: &str, err: &FlowError) -> String {
    format!(
        "{}{}?github_error={}",
        frontend_base,
        SETTINGS_PATH,
        err.code()
    )
}

/// Popup page posted back to the opener after a successful connection.
pub fn success_page(frontend_base: &str) -> String {
    let origin = if frontend_base.is_empty() {
        "*"
    } else {
        frontend_base
    };
    // JSON string literal is a valid JS string literal
    let target_origin = serde_json::to_string(origin).unwrap_or_else(|_| "\"*\"".to_string());

    format!(
        r#"<html>
    <head><title>GitHub Authentication Success</title></head>
    <body>
        <p>Success! This window will now close.</p>
        <script>
            if (window.opener) {{
                const message = {{ "source": "github-popup", "status": "success" }};
                window.opener.postMessage(message, {target_origin});
            }}
            window.close();
        </script>
    </body>
</html>
"#
    )
}

// HTTP boundary for the GitHub connection flow

mod cors;
pub mod github;
pub mod profile;

pub use cors::{cors_middleware, CorsSettings, ALLOWED_HEADERS, ALLOWED_METHODS, MAX_AGE_SECONDS};
pub use github::create_github_router;
pub use profile::create_profile_router;

use crate::auth::{extract_from_headers, ClaimExtractor, ClaimSet};
use crate::connection::{ConnectionFlow, FlowError};
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{warn, Span};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the JSON endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::MissingParameters | FlowError::AuthorizationDenied(_) => {
                AppError::BadRequest(err.to_string())
            }
            _ => AppError::ServerError(err.to_string()),
        }
    }
}

/// Shared application state for all routers
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<ConnectionFlow>,
    pub extractor: Arc<dyn ClaimExtractor>,
    /// Frontend base URL used for callback redirects and popup messaging
    pub frontend_url: Option<String>,
}

impl AppState {
    /// Caller identity from the gateway header, or 401.
    fn claims(&self, headers: &HeaderMap) -> Result<ClaimSet, AppError> {
        extract_from_headers(self.extractor.as_ref(), headers).map_err(|e| {
            warn!(error = %e, "Rejected request without valid identity");
            AppError::Unauthorized(e.to_string())
        })
    }

    /// Frontend base URL without trailing slash; empty when unset.
    fn frontend_base(&self) -> &str {
        self.frontend_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or("")
    }
}

/// Build the full application: all routers plus CORS, request id and tracing.
///
/// CORS is outermost so that `OPTIONS` is answered for every path, routed or not.
pub fn create_app(state: AppState, cors: CorsSettings) -> Router {
    Router::new()
        .merge(create_github_router(state.clone()))
        .merge(create_profile_router(state))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(middleware::from_fn_with_state(Arc::new(cors), cors_middleware))
}

/// Per-request span. Only the path is recorded; query strings carry OAuth codes.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}

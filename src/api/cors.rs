use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Apigateway-Api-Userinfo";
pub const MAX_AGE_SECONDS: &str = "3600";

/// Cross-origin settings applied to every response.
#[derive(Debug, Clone)]
pub struct CorsSettings {
    allow_origin: HeaderValue,
}

impl CorsSettings {
    /// Allowed origin is sent verbatim (`*` or a single origin).
    pub fn new(allow_origin: &str) -> Result<Self, header::InvalidHeaderValue> {
        Ok(Self {
            allow_origin: HeaderValue::from_str(allow_origin)?,
        })
    }

    pub fn permissive() -> Self {
        Self {
            allow_origin: HeaderValue::from_static("*"),
        }
    }

    pub fn allow_origin(&self) -> &HeaderValue {
        &self.allow_origin
    }

    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            self.allow_origin.clone(),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE_SECONDS),
        );
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self::permissive()
    }
}

/// Preflight requests get 204 with no body; everything else runs and is decorated.
pub async fn cors_middleware(
    State(settings): State<Arc<CorsSettings>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    settings.apply(response.headers_mut());
    response
}

use super::{AppError, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::Value;
use std::sync::Arc;

/// Create user profile router
pub fn create_profile_router(state: AppState) -> Router {
    Router::new()
        .route("/users/me", get(get_profile))
        .with_state(Arc::new(state))
}

/// GET /users/me
///
/// The caller's user document with the GitHub token decrypted.
/// 204 when the user has no document yet.
async fn get_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let claims = state.claims(&headers)?;

    match state.flow.read_profile(&claims.user_id).await? {
        Some(document) => Ok(Json(Value::Object(document)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

// Integration tests for the GitHub connection API

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ghlink::api::{create_app, AppState, CorsSettings};
use ghlink::auth::{GatewayClaimExtractor, USERINFO_HEADER};
use ghlink::cipher::LocalKeyCipher;
use ghlink::connection::{ConnectionFlow, FlowSettings};
use ghlink::oauth::{GitHubOAuthClient, OAuthProviderConfig};
use ghlink::store::{ConnectionStore, Document, MemoryConnectionStore, StoreError};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const FRONTEND: &str = "https://app.example";

fn provider_config(server: &ServerGuard) -> OAuthProviderConfig {
    OAuthProviderConfig {
        token_url: format!("{}/login/oauth/access_token", server.url()),
        api_base: server.url(),
        client_id: Some("abc".to_string()),
        client_secret: Some("shh".to_string()),
        ..Default::default()
    }
}

fn create_test_app(server: &ServerGuard, store: Arc<dyn ConnectionStore>) -> Router {
    let provider = provider_config(server);
    let exchanger = Arc::new(GitHubOAuthClient::new(&provider, Duration::from_secs(5)).unwrap());
    let cipher = Arc::new(LocalKeyCipher::new(&BASE64.encode([7u8; 32])).unwrap());

    let flow = ConnectionFlow::new(
        FlowSettings {
            provider,
            callback_base_url: Some("https://gw.example".to_string()),
        },
        exchanger,
        cipher,
        store,
    );

    let state = AppState {
        flow: Arc::new(flow),
        extractor: Arc::new(GatewayClaimExtractor),
        frontend_url: Some(format!("{}/", FRONTEND)),
    };

    create_app(state, CorsSettings::new(FRONTEND).unwrap())
}

fn userinfo(sub: &str) -> String {
    BASE64.encode(json!({"sub": sub, "email": format!("{}@example.com", sub)}).to_string())
}

fn request(method: Method, uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USERINFO_HEADER, userinfo(user));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_of(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn text_of(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

async fn mock_github_success(server: &mut ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let token = server
        .mock("POST", "/login/oauth/access_token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("code".into(), "abc".into()),
            Matcher::UrlEncoded(
                "redirect_uri".into(),
                "https://gw.example/github/callback".into(),
            ),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "tok", "token_type": "bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let user = server
        .mock("GET", "/user")
        .match_header("authorization", "token tok")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"login": "octocat", "id": 42}"#)
        .expect(1)
        .create_async()
        .await;

    (token, user)
}

#[tokio::test]
async fn test_connect_requires_identity() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, Arc::new(MemoryConnectionStore::new()));

    let response = app
        .oneshot(request(Method::GET, "/github/connect", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_of(response).await;
    assert_eq!(json["error"], "Authentication information not found");
}

#[tokio::test]
async fn test_connect_rejects_malformed_identity() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, Arc::new(MemoryConnectionStore::new()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/github/status")
                .header(USERINFO_HEADER, "not base64 json!")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_connect_returns_authorization_url() {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    let response = app
        .oneshot(request(Method::GET, "/github/connect", Some("u1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_of(response).await;
    let url = json["redirectUrl"].as_str().unwrap();
    assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
    assert!(url.contains("client_id=abc"));
    assert!(url.contains("redirect_uri=https://gw.example/github/callback"));
    assert!(url.contains("state=u1"));

    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_full_connection_lifecycle() {
    let mut server = Server::new_async().await;
    let (token_mock, user_mock) = mock_github_success(&mut server).await;
    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    // Callback stores the encrypted token
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/github/callback?code=abc&state=u1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = text_of(response).await;
    assert!(page.contains("github-popup"));
    assert!(page.contains(r#"postMessage(message, "https://app.example")"#));

    token_mock.assert_async().await;
    user_mock.assert_async().await;

    let stored = store.document("u1").unwrap();
    assert_eq!(stored["githubConnected"], true);
    assert_eq!(stored["githubLogin"], "octocat");
    assert_eq!(stored["githubId"], "42");
    let ciphertext = stored["githubAccessTokenCiphertext"].as_str().unwrap();
    assert_ne!(ciphertext, "tok");

    // Status
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/github/status", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_of(response).await,
        json!({"connected": true, "username": "octocat", "githubId": "42"})
    );

    // Profile read decrypts the token
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/users/me", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_of(response).await;
    assert_eq!(profile["githubAccessToken"], "tok");
    assert!(profile.get("githubAccessTokenCiphertext").is_none());

    // Disconnect
    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/github/disconnect", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_of(response).await["message"],
        "GitHub disconnected successfully."
    );

    let stored = store.document("u1").unwrap();
    assert_eq!(stored["githubConnected"], false);
    assert!(!stored.contains_key("githubAccessTokenCiphertext"));
    assert!(!stored.contains_key("githubLogin"));
    assert!(!stored.contains_key("githubId"));

    // Second disconnect is a no-op
    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/github/disconnect", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_of(response).await["message"],
        "No active GitHub connection to disconnect."
    );

    let response = app
        .oneshot(request(Method::GET, "/github/status", Some("u1")))
        .await
        .unwrap();
    assert_eq!(json_of(response).await, json!({"connected": false}));
}

#[tokio::test]
async fn test_callback_exchange_failure_redirects() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/login/oauth/access_token")
        .with_status(401)
        .with_body("bad credentials")
        .create_async()
        .await;
    let user = server
        .mock("GET", "/user")
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    let response = app
        .oneshot(request(Method::GET, "/github/callback?code=bad&state=u1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "https://app.example/auth/settings?github_error=token_exchange_failed"
    );
    assert!(store.is_empty());
    user.assert_async().await;
}

#[tokio::test]
async fn test_callback_missing_state_redirects() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let user = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    let response = app
        .oneshot(request(Method::GET, "/github/callback?code=abc", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "https://app.example/auth/settings?github_error=missing_params"
    );
    assert_eq!(store.write_count(), 0);
    token.assert_async().await;
    user.assert_async().await;
}

#[tokio::test]
async fn test_callback_repeated_code_redirects() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    let response = app
        .oneshot(request(
            Method::GET,
            "/github/callback?code=a&code=b&state=u1",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "https://app.example/auth/settings?github_error=missing_params"
    );
    assert_eq!(store.write_count(), 0);
    token.assert_async().await;
}

#[tokio::test]
async fn test_callback_provider_denied_redirects() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, Arc::new(MemoryConnectionStore::new()));

    let response = app
        .oneshot(request(
            Method::GET,
            "/github/callback?error=access_denied&error_description=User+cancelled&state=u1",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "https://app.example/auth/settings?github_error=authorization_denied"
    );
}

#[tokio::test]
async fn test_profile_without_document() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, Arc::new(MemoryConnectionStore::new()));

    let response = app
        .oneshot(request(Method::GET, "/users/me", Some("nobody")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_status_and_disconnect_with_foreign_timestamp() {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryConnectionStore::new());
    let app = create_test_app(&server, store.clone());

    let seeded = json!({
        "githubConnected": true,
        "githubLogin": "octocat",
        "githubId": "42",
        "githubAccessTokenCiphertext": "opaque",
        "lastUpdated": {"seconds": 1}
    });
    if let Value::Object(document) = seeded {
        store.insert_document("u1", document);
    }

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/github/status", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_of(response).await;
    assert_eq!(json["connected"], true);
    assert_eq!(json["username"], "octocat");

    let response = app
        .oneshot(request(Method::DELETE, "/github/disconnect", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = store.document("u1").unwrap();
    assert_eq!(stored["githubConnected"], false);
    assert!(!stored.contains_key("githubAccessTokenCiphertext"));
    assert!(!stored.contains_key("githubLogin"));
}

/// Store whose every call fails.
struct BrokenStore;

#[async_trait]
impl ConnectionStore for BrokenStore {
    async fn get_document(&self, _user_id: &str) -> Result<Option<Document>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn upsert_merge(&self, _user_id: &str, _fields: Document) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn update_fields(
        &self,
        _user_id: &str,
        _set_fields: Document,
        _delete_fields: &[&str],
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_is_internal_error() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, Arc::new(BrokenStore));

    for (method, uri) in [
        (Method::GET, "/github/status"),
        (Method::DELETE, "/github/disconnect"),
        (Method::GET, "/users/me"),
    ] {
        let response = app
            .clone()
            .oneshot(request(method, uri, Some("u1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error"], "An internal error occurred");
    }
}

#[tokio::test]
async fn test_callback_store_failure_redirects() {
    let mut server = Server::new_async().await;
    let _mocks = mock_github_success(&mut server).await;
    let app = create_test_app(&server, Arc::new(BrokenStore));

    let response = app
        .oneshot(request(Method::GET, "/github/callback?code=abc&state=u1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "https://app.example/auth/settings?github_error=internal_error"
    );
}

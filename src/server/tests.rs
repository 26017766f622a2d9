use super::*;
use crate::auth::TokenVerificationError;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use tower::ServiceExt;

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

struct StubVerifier;

#[async_trait]
impl TokenVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Result<String, TokenVerificationError> {
        match token {
            "alice-token" => Ok("alice".to_string()),
            _ => Err(TokenVerificationError::InvalidToken("unknown".to_string())),
        }
    }
}

fn state(server: &MockServer, settings: Settings) -> AppState {
    let client = ClientBuilder::new(Client::new()).build();
    AppState {
        db: FirebaseFirestore::with_client(client.clone(), server.url("/v1"), "test-project"),
        messaging: FirebaseMessaging::with_client(client, server.url("/v1"), "test-project"),
        verifier: Arc::new(StubVerifier),
        settings: Arc::new(settings),
    }
}

fn post_json(uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, Settings::default()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_callable_requires_data() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, Settings::default()));

    let response = app
        .oneshot(post_json("/preventPasswordReuse", Some("alice-token"), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["status"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_callable_without_auth() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, Settings::default()));

    let response = app
        .oneshot(post_json(
            "/preventPasswordReuse",
            None,
            json!({ "data": { "newPassword": "s3cret" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await,
        json!({
            "error": {
                "status": "UNAUTHENTICATED",
                "message": "Sign in to update your password."
            }
        })
    );
}

#[tokio::test]
async fn test_callable_with_invalid_token() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, Settings::default()));

    let response = app
        .oneshot(post_json(
            "/preventPasswordReuse",
            Some("forged"),
            json!({ "data": { "newPassword": "s3cret" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callable_success() {
    let server = MockServer::start_async().await;
    let history = format!("{}/users/alice/security/passwordHistory", DOCS);

    server
        .mock_async(|when, then| {
            when.method(GET).path(history.clone());
            then.status(404).json_body(json!({
                "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
            }));
        })
        .await;
    let write = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path(history.clone())
                .query_param("updateMask.fieldPaths", "hashes");
            then.status(200).json_body(json!({
                "name": "projects/test-project/databases/(default)/documents/users/alice/security/passwordHistory"
            }));
        })
        .await;

    let app = router(state(&server, Settings::default()));
    let response = app
        .oneshot(post_json(
            "/preventPasswordReuse",
            Some("alice-token"),
            json!({ "data": { "newPassword": "s3cret" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "result": { "success": true } }));
    write.assert_async().await;
}

fn with_secret(secret: &str) -> Settings {
    let mut settings = Settings::default();
    settings.events.shared_secret = Some(secret.to_string());
    settings
}

#[tokio::test]
async fn test_user_event_requires_shared_secret() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, with_secret("hook-secret")));

    let response = app
        .oneshot(post_json(
            "/events/userCreated",
            Some("wrong"),
            json!({ "uid": "alice" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_event_rejects_secret_prefix_and_missing_header() {
    let server = MockServer::start_async().await;

    for token in [Some("hook-secre"), Some("hook-secret-and-more"), None] {
        let app = router(state(&server, with_secret("hook-secret")));
        let response = app
            .oneshot(post_json("/events/userCreated", token, json!({ "uid": "alice" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[test]
fn test_secret_matches() {
    assert!(events::secret_matches("hook-secret", "hook-secret"));
    assert!(!events::secret_matches("hook-secreT", "hook-secret"));
    assert!(!events::secret_matches("", "hook-secret"));
}

#[tokio::test]
async fn test_user_event_creates_profile() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{}/users", DOCS))
                .query_param("documentId", "alice")
                .body_includes("\"email\":{\"stringValue\":\"alice@example.com\"}");
            then.status(200).json_body(json!({
                "name": "projects/test-project/databases/(default)/documents/users/alice"
            }));
        })
        .await;

    let app = router(state(&server, with_secret("hook-secret")));
    let response = app
        .oneshot(post_json(
            "/events/userCreated",
            Some("hook-secret"),
            json!({ "uid": "alice", "email": "alice@example.com" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    create.assert_async().await;
}

#[tokio::test]
async fn test_user_event_rejects_empty_uid() {
    let server = MockServer::start_async().await;
    let app = router(state(&server, Settings::default()));

    let response = app
        .oneshot(post_json("/events/userCreated", None, json!({ "uid": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

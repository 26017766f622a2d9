use super::*;
use httpmock::prelude::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde_json::json;

fn verifier(server: &MockServer) -> IdTokenVerifier {
    IdTokenVerifier::with_key_manager(
        "test-project",
        PublicKeyManager::with_url(Client::new(), server.url("/certs")),
    )
}

#[tokio::test]
async fn test_malformed_token_is_rejected() {
    let server = MockServer::start_async().await;
    let verifier = verifier(&server);

    let result = verifier.verify("not-a-jwt").await;
    assert!(matches!(result, Err(TokenVerificationError::JwtError(_))));
}

#[tokio::test]
async fn test_non_rs256_token_is_rejected() {
    // No certs mock: reaching the key endpoint would surface as a KeyFetchError instead.
    let server = MockServer::start_async().await;

    let token = encode(
        &Header::default(),
        &json!({
            "aud": "test-project",
            "iss": "https://securetoken.google.com/test-project",
            "sub": "alice",
            "exp": 4102444800u64,
            "iat": 1700000000u64,
            "auth_time": 1700000000u64
        }),
        &EncodingKey::from_secret(b"secret"),
    )
    .unwrap();

    let result = verifier(&server).verify(&token).await;
    assert!(matches!(result, Err(TokenVerificationError::InvalidToken(_))));
}

#[test]
fn test_auth_user_record_wire_names() {
    let user: AuthUserRecord = serde_json::from_value(json!({
        "uid": "alice",
        "email": "alice@example.com",
        "displayName": "Alice",
        "photoURL": "https://example.com/a.png"
    }))
    .unwrap();

    assert_eq!(user.uid, "alice");
    assert_eq!(user.display_name.as_deref(), Some("Alice"));
    assert_eq!(user.photo_url.as_deref(), Some("https://example.com/a.png"));
    assert_eq!(user.phone_number, None);
}

use super::{bearer_token, AppState};
use crate::auth::AuthUserRecord;
use crate::functions::{on_user_created, FunctionError};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Receives the auth `user created` event and writes the default profile.
pub async fn user_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.settings.events.shared_secret.as_deref() {
        if !bearer_token(&headers).is_some_and(|token| secret_matches(token, secret)) {
            tracing::warn!("rejected user event with a bad shared secret");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let user: AuthUserRecord = match serde_json::from_slice(&body) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "malformed user event");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match on_user_created(&state.db, &user).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(FunctionError::InvalidEvent(message)) => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Err(e) => {
            tracing::error!(uid = %user.uid, error = %e, "user created handler failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Compares digests in constant time so neither the secret's bytes nor its length leak.
pub(crate) fn secret_matches(presented: &str, secret: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let secret = Sha256::digest(secret.as_bytes());
    presented.as_slice().ct_eq(secret.as_slice()).into()
}

//! The callable-function wire protocol: `{"data": ...}` in, `{"result": ...}` or
//! `{"error": {"status", "message"}}` out.

use super::{bearer_token, AppState};
use crate::functions::password::{self, PasswordReuseRequest, PasswordReuseResponse};
use crate::functions::{CallableError, FunctionsErrorCode};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Deserialize)]
struct CallableRequest {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// A successful callable result.
pub struct CallableResponse<T>(pub T);

impl<T: Serialize> IntoResponse for CallableResponse<T> {
    fn into_response(self) -> Response {
        Json(json!({ "result": self.0 })).into_response()
    }
}

impl IntoResponse for CallableError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "status": self.code.status(),
                "message": self.message,
            }
        });
        (self.code.http_status(), Json(body)).into_response()
    }
}

/// Decodes the `data` member of a callable request body.
pub(crate) fn parse_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, CallableError> {
    let bad_request = || CallableError::new(FunctionsErrorCode::InvalidArgument, "Bad Request");

    let request: CallableRequest = serde_json::from_slice(body).map_err(|_| bad_request())?;
    let data = request.data.ok_or_else(bad_request)?;
    serde_json::from_value(data).map_err(|_| bad_request())
}

/// The verified uid of the caller. No token means an anonymous call; a bad token is an error.
pub(crate) async fn caller_uid(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<String>, CallableError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };

    match state.verifier.verify(token).await {
        Ok(uid) => Ok(Some(uid)),
        Err(e) => {
            tracing::warn!(error = %e, "rejected callable ID token");
            Err(CallableError::new(
                FunctionsErrorCode::Unauthenticated,
                "Unauthenticated",
            ))
        }
    }
}

pub async fn prevent_password_reuse(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<CallableResponse<PasswordReuseResponse>, CallableError> {
    let uid = caller_uid(&state, &headers).await?;
    let request: PasswordReuseRequest = parse_data(&body)?;

    password::prevent_password_reuse(
        &state.db,
        uid.as_deref(),
        &request,
        state.settings.password.history_size,
    )
    .await
    .map(CallableResponse)
}

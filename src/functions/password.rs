use super::{FunctionError, USERS_COLLECTION};
use crate::firestore::FirebaseFirestore;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_HISTORY_SIZE: usize = 3;

/// Canonical error codes of the callable protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionsErrorCode {
    InvalidArgument,
    FailedPrecondition,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Internal,
}

impl FunctionsErrorCode {
    /// The code as client SDKs spell it, e.g. `failed-precondition`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::FailedPrecondition => "failed-precondition",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::Internal => "internal",
        }
    }

    /// The status string carried on the wire, e.g. `FAILED_PRECONDITION`.
    pub fn status(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidArgument | Self::FailedPrecondition => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for FunctionsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned to a callable's caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct CallableError {
    pub code: FunctionsErrorCode,
    pub message: String,
}

impl CallableError {
    pub fn new(code: FunctionsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<FunctionError> for CallableError {
    fn from(error: FunctionError) -> Self {
        tracing::error!(error = %error, "callable failed");
        CallableError::new(FunctionsErrorCode::Internal, "Internal error.")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReuseRequest {
    #[serde(default)]
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PasswordReuseResponse {
    pub success: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PasswordHistory {
    #[serde(default)]
    hashes: Vec<String>,
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Rejects a new password that matches one of the caller's recent ones, then records it.
pub async fn prevent_password_reuse(
    db: &FirebaseFirestore,
    uid: Option<&str>,
    request: &PasswordReuseRequest,
    history_size: usize,
) -> Result<PasswordReuseResponse, CallableError> {
    let uid = uid.filter(|uid| !uid.is_empty()).ok_or_else(|| {
        CallableError::new(
            FunctionsErrorCode::Unauthenticated,
            "Sign in to update your password.",
        )
    })?;

    let new_password = request
        .new_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            CallableError::new(FunctionsErrorCode::InvalidArgument, "newPassword is required.")
        })?;

    let hash = hash_password(new_password);
    let history_ref = db
        .collection(USERS_COLLECTION)
        .doc(uid)
        .collection("security")
        .doc("passwordHistory");

    let history: PasswordHistory = history_ref
        .get()
        .await
        .map_err(FunctionError::from)?
        .unwrap_or_default();

    if history.hashes.contains(&hash) {
        tracing::info!(uid, "rejected reused password");
        return Err(CallableError::new(
            FunctionsErrorCode::FailedPrecondition,
            "Choose a password you have not used recently.",
        ));
    }

    let mut hashes = Vec::with_capacity(history_size);
    hashes.push(hash);
    hashes.extend(history.hashes);
    hashes.truncate(history_size);

    history_ref
        .update(&PasswordHistory { hashes }, &["hashes"])
        .await
        .map_err(FunctionError::from)?;

    tracing::info!(uid, "recorded password change");
    Ok(PasswordReuseResponse { success: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_is_sha256_hex() {
        assert_eq!(
            hash_password("hunter2"),
            "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(FunctionsErrorCode::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(FunctionsErrorCode::FailedPrecondition.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(FunctionsErrorCode::FailedPrecondition.status(), "FAILED_PRECONDITION");
        assert_eq!(
            CallableError::new(FunctionsErrorCode::InvalidArgument, "newPassword is required.")
                .to_string(),
            "invalid-argument: newPassword is required."
        );
    }
}

use async_trait::async_trait;

pub mod keys;
pub mod models;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use keys::{KeyFetchError, PublicKeyManager};
pub use models::AuthUserRecord;
pub use verifier::{FirebaseTokenClaims, IdTokenVerifier, TokenVerificationError};

/// Verifies a Firebase ID token and yields the caller's uid.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, TokenVerificationError>;
}

use super::{FunctionError, USERS_COLLECTION};
use crate::auth::AuthUserRecord;
use crate::firestore::{FirebaseFirestore, FirestoreError, Timestamp};
use serde::{Deserialize, Serialize};

/// The profile document every new account starts with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    pub phone_number: String,
    pub address: String,
    pub profile_image_url: String,
    pub role: String,
    pub fcm_tokens: Vec<String>,
    pub created_at: Timestamp,
}

impl UserProfile {
    pub const DEFAULT_ROLE: &'static str = "owner";

    pub fn for_user(user: &AuthUserRecord, created_at: Timestamp) -> Self {
        Self {
            email: user.email.clone().unwrap_or_default(),
            name: user.display_name.clone().unwrap_or_default(),
            phone_number: user.phone_number.clone().unwrap_or_default(),
            address: String::new(),
            profile_image_url: user.photo_url.clone().unwrap_or_default(),
            role: Self::DEFAULT_ROLE.to_string(),
            fcm_tokens: Vec::new(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCreatedOutcome {
    Created,
    /// The client wrote its own profile first; it was left as is.
    AlreadyExists,
}

pub async fn on_user_created(
    db: &FirebaseFirestore,
    user: &AuthUserRecord,
) -> Result<UserCreatedOutcome, FunctionError> {
    if user.uid.trim().is_empty() {
        return Err(FunctionError::InvalidEvent(
            "user record has an empty uid".to_string(),
        ));
    }

    let profile = UserProfile::for_user(user, Timestamp::now());

    match db
        .collection(USERS_COLLECTION)
        .create(&user.uid, &profile)
        .await
    {
        Ok(_) => {
            tracing::info!(uid = %user.uid, "created user profile");
            Ok(UserCreatedOutcome::Created)
        }
        Err(FirestoreError::AlreadyExists(path)) => {
            tracing::info!(uid = %user.uid, path, "user profile already exists");
            Ok(UserCreatedOutcome::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

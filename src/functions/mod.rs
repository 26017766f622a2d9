//! Trigger handlers.
//!
//! Every handler is a single hop: read the related documents, format the notification,
//! hand it to FCM. Delivery of the triggering event lives in `runtime` and `server`.

use crate::firestore::models::Value;
use crate::firestore::{FirebaseFirestore, FirestoreError};
use crate::messaging::models::{Message, MulticastMessage, Notification};
use crate::messaging::{FirebaseMessaging, MessagingError, MAX_MULTICAST_TOKENS};
use serde::Deserialize;
use thiserror::Error;

pub mod bookings;
pub mod chat;
pub mod password;
pub mod reminders;
pub mod users;


pub use bookings::{on_booking_written, Booking, BookingDispatch, BookingKind};
pub use chat::{on_message_created, ChatDispatch, ChatMessage};
pub use password::{
    prevent_password_reuse, CallableError, FunctionsErrorCode, PasswordReuseRequest,
    PasswordReuseResponse,
};
pub use reminders::{send_appointment_reminders, ReminderReport, ReminderSettings};
pub use users::{on_user_created, UserCreatedOutcome, UserProfile};

pub(crate) const USERS_COLLECTION: &str = "users";

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

#[derive(Debug, Default, Deserialize)]
struct UserTokens {
    #[serde(rename = "fcmTokens", default)]
    fcm_tokens: Vec<String>,
}

/// The push tokens registered on `users/{uid}`, oldest first.
///
/// A missing user or a missing `fcmTokens` field yields no tokens.
pub async fn get_user_tokens(
    db: &FirebaseFirestore,
    uid: &str,
) -> Result<Vec<String>, FunctionError> {
    if uid.is_empty() {
        return Ok(Vec::new());
    }

    let user: Option<UserTokens> = db.collection(USERS_COLLECTION).doc(uid).get().await?;
    Ok(user.map(|u| u.fcm_tokens).unwrap_or_default())
}

/// What a notification fan-out to one user did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    pub recipient: String,
    pub attempted: usize,
    pub delivered: usize,
    /// Tokens FCM reported as dead, removed from the user's profile.
    pub pruned: Vec<String>,
}

impl PushOutcome {
    fn skipped(uid: &str) -> Self {
        Self {
            recipient: uid.to_string(),
            ..Default::default()
        }
    }
}

/// Sends `title`/`body` to every token of `uid`. No tokens means no FCM call.
pub(crate) async fn notify_user(
    db: &FirebaseFirestore,
    fcm: &FirebaseMessaging,
    uid: &str,
    title: &str,
    body: &str,
) -> Result<PushOutcome, FunctionError> {
    let tokens = get_user_tokens(db, uid).await?;
    if tokens.is_empty() {
        tracing::debug!(uid, "no push tokens, skipping notification");
        return Ok(PushOutcome::skipped(uid));
    }

    let mut outcome = PushOutcome {
        recipient: uid.to_string(),
        attempted: tokens.len(),
        ..Default::default()
    };

    for chunk in tokens.chunks(MAX_MULTICAST_TOKENS) {
        let message = MulticastMessage {
            tokens: chunk.to_vec(),
            notification: Some(Notification::new(title, body)),
            ..Default::default()
        };
        let batch = fcm.send_each_for_multicast(&message).await?;
        outcome.delivered += batch.success_count;

        for (token, response) in chunk.iter().zip(&batch.responses) {
            if let Some(error) = &response.error {
                if error.is_dead_token() {
                    outcome.pruned.push(token.clone());
                } else {
                    tracing::warn!(uid, code = ?error.code, error = %error.message, "push delivery failed");
                }
            }
        }
    }

    if !outcome.pruned.is_empty() {
        prune_tokens(db, uid, &outcome.pruned).await;
    }

    tracing::info!(
        uid,
        attempted = outcome.attempted,
        delivered = outcome.delivered,
        pruned = outcome.pruned.len(),
        "sent notification"
    );
    Ok(outcome)
}

/// Sends `title`/`body` to a single token of `uid`, pruning it if FCM says it is dead.
///
/// Returns whether FCM accepted the message.
pub(crate) async fn notify_token(
    db: &FirebaseFirestore,
    fcm: &FirebaseMessaging,
    uid: &str,
    token: &str,
    title: &str,
    body: &str,
) -> Result<bool, FunctionError> {
    let message = Message {
        token: Some(token.to_string()),
        notification: Some(Notification::new(title, body)),
        ..Default::default()
    };

    match fcm.send(&message).await {
        Ok(message_id) => {
            tracing::info!(uid, message_id, "sent notification");
            Ok(true)
        }
        Err(e) if e.is_dead_token() => {
            tracing::info!(uid, error = %e, "push token is dead");
            prune_tokens(db, uid, &[token.to_string()]).await;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes `tokens` from `users/{uid}.fcmTokens`. Failures are logged, never returned.
async fn prune_tokens(db: &FirebaseFirestore, uid: &str, tokens: &[String]) {
    let values = tokens.iter().map(Value::string).collect();
    if let Err(e) = db
        .collection(USERS_COLLECTION)
        .doc(uid)
        .array_remove("fcmTokens", values)
        .await
    {
        tracing::warn!(uid, error = %e, "failed to prune stale push tokens");
    } else {
        tracing::debug!(uid, count = tokens.len(), "pruned stale push tokens");
    }
}

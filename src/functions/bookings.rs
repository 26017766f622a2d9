use super::{notify_user, FunctionError, PushOutcome};
use crate::firestore::{Change, FirebaseFirestore, Timestamp};
use crate::messaging::FirebaseMessaging;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which booking collection a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Vet,
    Sitter,
}

impl BookingKind {
    pub const ALL: [BookingKind; 2] = [BookingKind::Vet, BookingKind::Sitter];

    pub fn collection(self) -> &'static str {
        match self {
            BookingKind::Vet => "vetBookings",
            BookingKind::Sitter => "sitterBookings",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BookingKind::Vet => "vet",
            BookingKind::Sitter => "sitter",
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub pet_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sitter_id: Option<String>,
}

impl Booking {
    pub fn provider_id(&self, kind: BookingKind) -> Option<&str> {
        match kind {
            BookingKind::Vet => self.vet_id.as_deref(),
            BookingKind::Sitter => self.sitter_id.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }
}

/// Who was notified about a booking write.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingDispatch {
    /// Deleted booking or no status change.
    Skipped,
    Notified {
        owner: PushOutcome,
        provider: Option<PushOutcome>,
    },
}

pub async fn on_booking_written(
    db: &FirebaseFirestore,
    fcm: &FirebaseMessaging,
    kind: BookingKind,
    change: Change<Booking>,
) -> Result<BookingDispatch, FunctionError> {
    let Some(after) = change.after else {
        return Ok(BookingDispatch::Skipped);
    };

    if change
        .before
        .as_ref()
        .is_some_and(|before| before.status == after.status)
    {
        return Ok(BookingDispatch::Skipped);
    }

    tracing::info!(
        kind = %kind,
        owner = %after.owner_id,
        status = %after.status,
        "booking status changed"
    );

    let owner = notify_user(
        db,
        fcm,
        &after.owner_id,
        "Booking update",
        &format!("Your {} booking is now {}.", kind.label(), after.status),
    )
    .await?;

    let provider = match after.provider_id(kind) {
        Some(provider_id) => Some(
            notify_user(
                db,
                fcm,
                provider_id,
                "New booking status",
                &format!("Booking for pet {} is {}.", after.pet_id, after.status),
            )
            .await?,
        ),
        None => None,
    };

    Ok(BookingDispatch::Notified { owner, provider })
}

use super::bookings::{Booking, BookingKind};
use super::{notify_user, FunctionError};
use crate::firestore::models::{FieldOperator, Value};
use crate::firestore::{decode_document, FirebaseFirestore, Query};
use crate::messaging::FirebaseMessaging;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;

pub const REMINDER_STATUS: &str = "accepted";

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    /// How far ahead of `now` a booking must start to be reminded.
    pub window: Duration,
    pub collections: Vec<String>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            window: Duration::minutes(60),
            collections: BookingKind::ALL
                .iter()
                .map(|kind| kind.collection().to_string())
                .collect(),
        }
    }
}

/// Counts for one reminder run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// Bookings in the window, whatever their status.
    pub scanned: usize,
    pub reminded: usize,
    pub failed: usize,
}

/// Reminds owners of accepted bookings that start within the window after `now`.
///
/// One booking failing does not stop the others; it is logged and counted.
pub async fn send_appointment_reminders(
    db: &FirebaseFirestore,
    fcm: &FirebaseMessaging,
    now: DateTime<Utc>,
    settings: &ReminderSettings,
) -> Result<ReminderReport, FunctionError> {
    let until = now + settings.window;
    let mut report = ReminderReport::default();
    let mut due = Vec::new();

    for collection in &settings.collections {
        let query = Query::new(collection.as_str())
            .where_value("date", FieldOperator::GreaterThanOrEqual, Value::timestamp(now))
            .where_value("date", FieldOperator::LessThanOrEqual, Value::timestamp(until));

        let snapshot = match db.query(query).get().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(collection = %collection, error = %e, "reminder query failed");
                report.failed += 1;
                continue;
            }
        };

        report.scanned += snapshot.size();

        for doc in &snapshot {
            let Some(document) = doc.document() else {
                continue;
            };
            match decode_document::<Booking>(document) {
                Ok(booking) if booking.status == REMINDER_STATUS => {
                    due.push((doc.id().to_string(), booking))
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(booking = doc.id(), error = %e, "unreadable booking");
                    report.failed += 1;
                }
            }
        }
    }

    let results = join_all(due.iter().map(|(id, booking)| async move {
        let body = format!("Appointment for pet {} is coming up soon.", booking.pet_id);
        let result = notify_user(db, fcm, &booking.owner_id, "Appointment reminder", &body).await;
        (id, result)
    }))
    .await;

    for (id, result) in results {
        match result {
            Ok(_) => report.reminded += 1,
            Err(e) => {
                tracing::error!(booking = %id, error = %e, "failed to send reminder");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        reminded = report.reminded,
        failed = report.failed,
        "appointment reminders finished"
    );
    Ok(report)
}

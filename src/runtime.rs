//! Long-running loops that feed events to the handlers.
//!
//! Firestore triggers ride on `listen` streams: each loop keeps one [`ChangeTracker`] for its
//! whole life, so a reconnect re-syncs silently and only real writes reach a handler. The
//! message loop only cares about creates and uses a tracker that holds no documents.

use crate::firestore::models::{Document, FieldOperator, Value};
use crate::firestore::{Change, ChangeTracker, FirebaseFirestore, Query};
use crate::functions::chat::{chat_id_from_message_name, MESSAGES_COLLECTION};
use crate::functions::{
    on_booking_written, on_message_created, send_appointment_reminders, Booking, BookingKind,
    ChatMessage,
};
use crate::PetpalApp;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Runs the booking-write trigger for `kind` until the task is dropped.
pub async fn watch_bookings(app: PetpalApp, kind: BookingKind) {
    let query = Query::new(kind.collection());
    let delay = app.settings.watch.reconnect_delay();

    let tracker = ChangeTracker::new();
    watch(&app.db, query, kind.collection(), tracker, delay, |change| {
        let app = &app;
        async move {
            let name = change.name().to_string();
            let typed = match change.decode::<Booking>() {
                Ok(typed) => typed,
                Err(e) => {
                    tracing::warn!(document = %name, error = %e, "unreadable booking");
                    return;
                }
            };
            if let Err(e) = on_booking_written(&app.db, &app.messaging, kind, typed).await {
                tracing::error!(document = %name, error = %e, "booking handler failed");
            }
        }
    })
    .await
}

/// Runs the chat-message-create trigger for messages created after the loop started.
pub async fn watch_messages(app: PetpalApp) {
    watch_messages_since(app, Utc::now()).await
}

pub async fn watch_messages_since(app: PetpalApp, start: DateTime<Utc>) {
    let query = Query::collection_group(MESSAGES_COLLECTION).where_value(
        "createdAt",
        FieldOperator::GreaterThanOrEqual,
        Value::timestamp(start),
    );
    let delay = app.settings.watch.reconnect_delay();

    let tracker = ChangeTracker::creates_only();
    watch(&app.db, query, MESSAGES_COLLECTION, tracker, delay, |change| {
        let app = &app;
        async move { handle_message(app, change).await }
    })
    .await
}

async fn handle_message(app: &PetpalApp, change: Change<Document>) {
    let name = change.name();
    let Some(chat_id) = chat_id_from_message_name(name) else {
        tracing::debug!(document = %name, "message outside a chat");
        return;
    };

    let message = match change.decode::<ChatMessage>() {
        Ok(Change {
            after: Some(message),
            ..
        }) => message,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(document = %name, error = %e, "unreadable chat message");
            return;
        }
    };

    if let Err(e) = on_message_created(&app.db, &app.messaging, chat_id, &message).await {
        tracing::error!(chat_id, error = %e, "chat message handler failed");
    }
}

/// Listens to `query` forever, reconnecting after `reconnect_delay` whenever the stream
/// fails or ends.
async fn watch<F, Fut>(
    db: &FirebaseFirestore,
    query: Query,
    label: &str,
    mut tracker: ChangeTracker,
    reconnect_delay: Duration,
    mut on_change: F,
) where
    F: FnMut(Change<Document>) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let resume_token = tracker.resume_token().map(str::to_string);
        match db.query(query.clone()).listen(resume_token).await {
            Ok(mut stream) => {
                tracing::info!(target_name = label, resumed = tracker.is_seeded(), "listening");
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(response) => {
                            for change in tracker.apply(response) {
                                on_change(change).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(target_name = label, error = %e, "listen stream failed");
                            break;
                        }
                    }
                }
                tracing::info!(target_name = label, "listen stream closed");
            }
            Err(e) => {
                tracing::warn!(target_name = label, error = %e, "failed to open listen stream");
            }
        }

        sleep(reconnect_delay).await;
    }
}

/// Runs the reminder job on its interval. Late ticks are skipped rather than replayed.
pub async fn run_reminders(app: PetpalApp) {
    let period = app.settings.reminders.interval();
    let settings = app.settings.reminders.reminder_settings();

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(every_secs = period.as_secs(), "appointment reminders scheduled");
    loop {
        ticker.tick().await;
        if let Err(e) =
            send_appointment_reminders(&app.db, &app.messaging, Utc::now(), &settings).await
        {
            tracing::error!(error = %e, "appointment reminder run failed");
        }
    }
}

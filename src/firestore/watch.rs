use super::models::{Document, ListenResponse, TargetChangeType};
use super::reference::decode_document;
use super::FirestoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};

/// The before/after pair of a single document write.
///
/// `before` is absent for creates and `after` is absent for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub before: Option<T>,
    pub after: Option<T>,
}

impl<T> Change<T> {
    pub fn new(before: Option<T>, after: Option<T>) -> Self {
        Self { before, after }
    }

    pub fn is_create(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.after.is_none()
    }
}

impl Change<Document> {
    /// The full resource name of the changed document.
    pub fn name(&self) -> &str {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|d| d.name.as_str())
            .unwrap_or_default()
    }

    /// Decodes both sides into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Change<T>, FirestoreError> {
        Ok(Change {
            before: self.before.as_ref().map(decode_document).transpose()?,
            after: self.after.as_ref().map(decode_document).transpose()?,
        })
    }
}

/// Folds a listen stream into document changes.
///
/// The first snapshot, up to the first `CURRENT`, only seeds the tracker: those documents
/// existed before we started watching and must not look like fresh writes. After that every
/// add, modify, delete or remove is reported with the previously seen version. The seeded
/// state survives reconnects, so a re-sync only reports documents whose `updateTime` moved.
///
/// A `RESET` makes the server resend the whole result set. Documents it does not resend
/// before the next `CURRENT` are gone and are reported as deletes.
///
/// [`ChangeTracker::creates_only`] keeps no documents at all and only reports creates, for
/// append-only collections that would otherwise be held in memory forever.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    documents: HashMap<String, Document>,
    creates_only: bool,
    seeded: bool,
    resume_token: Option<String>,
    /// Names resent since the last `RESET`, while a re-sync is in progress.
    resync: Option<HashSet<String>>,
    /// Read time of the last consistent snapshot.
    read_time: Option<DateTime<Utc>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that reports only newly created documents and remembers none of them.
    pub fn creates_only() -> Self {
        Self {
            creates_only: true,
            ..Self::default()
        }
    }

    /// Whether the initial snapshot has been fully received.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// The latest resume token the server handed out.
    pub fn resume_token(&self) -> Option<&str> {
        self.resume_token.as_deref()
    }

    /// Number of documents currently held.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn apply(&mut self, response: ListenResponse) -> Vec<Change<Document>> {
        let mut changes = Vec::new();

        if let Some(target_change) = response.target_change {
            if let Some(token) = target_change.resume_token {
                self.resume_token = Some(token);
            }
            match target_change.target_change_type {
                TargetChangeType::Reset => self.resync = Some(HashSet::new()),
                TargetChangeType::Current => {
                    changes.extend(self.finish_resync());
                    self.seeded = true;
                }
                _ => {}
            }
            if self.resync.is_none() {
                if let Some(read_time) = target_change.read_time.as_deref().and_then(parse_time) {
                    self.read_time = Some(read_time);
                }
            }
        }

        if let Some(change) = response.document_change {
            let document = change.document;
            // A change that only lists removed targets means the doc left our query.
            if change.target_ids.is_empty() && !change.removed_target_ids.is_empty() {
                changes.extend(self.forget(&document.name));
            } else if self.creates_only {
                if self.is_fresh_create(&document) {
                    changes.push(Change::new(None, Some(document)));
                }
            } else {
                if let Some(seen) = self.resync.as_mut() {
                    seen.insert(document.name.clone());
                }
                let before = self.documents.insert(document.name.clone(), document.clone());
                let unchanged = before
                    .as_ref()
                    .is_some_and(|b| b.update_time == document.update_time);
                if self.seeded && !unchanged {
                    changes.push(Change::new(before, Some(document)));
                }
            }
        }

        if let Some(delete) = response.document_delete {
            changes.extend(self.forget(&delete.document));
        }

        if let Some(remove) = response.document_remove {
            changes.extend(self.forget(&remove.document));
        }

        changes
    }

    /// A document never written since its creation. During a re-sync the server replays
    /// old documents too, so only those created after the last snapshot count.
    fn is_fresh_create(&self, document: &Document) -> bool {
        if !self.seeded || document.create_time.is_empty() {
            return false;
        }
        if document.create_time != document.update_time {
            return false;
        }
        if self.resync.is_none() {
            return true;
        }
        match (parse_time(&document.create_time), self.read_time) {
            (Some(created), Some(read_time)) => created > read_time,
            _ => false,
        }
    }

    /// Ends a `RESET` re-sync, dropping every document the server did not resend.
    fn finish_resync(&mut self) -> Vec<Change<Document>> {
        let Some(seen) = self.resync.take() else {
            return Vec::new();
        };
        let gone: Vec<String> = self
            .documents
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        gone.iter().filter_map(|name| self.forget(name)).collect()
    }

    fn forget(&mut self, name: &str) -> Option<Change<Document>> {
        let before = self.documents.remove(name)?;
        self.seeded.then(|| Change::new(Some(before), None))
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> ListenResponse {
        serde_json::from_value(value).unwrap()
    }

    fn booking_change(id: &str, status: &str, update_time: &str) -> ListenResponse {
        response(json!({
            "documentChange": {
                "document": {
                    "name": format!("projects/p/databases/(default)/documents/vetBookings/{}", id),
                    "fields": { "status": { "stringValue": status } },
                    "updateTime": update_time
                },
                "targetIds": [1]
            }
        }))
    }

    fn current() -> ListenResponse {
        response(json!({
            "targetChange": { "targetChangeType": "CURRENT", "resumeToken": "tok-1" }
        }))
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Status {
        status: String,
    }

    #[test]
    fn test_initial_snapshot_is_silent() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.apply(booking_change("b1", "pending", "t1")).is_empty());
        assert!(!tracker.is_seeded());

        assert!(tracker.apply(current()).is_empty());
        assert!(tracker.is_seeded());
        assert_eq!(tracker.resume_token(), Some("tok-1"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_update_carries_previous_version() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(booking_change("b1", "pending", "t1"));
        tracker.apply(current());

        let changes = tracker.apply(booking_change("b1", "accepted", "t2"));
        assert_eq!(changes.len(), 1);

        let typed: Change<Status> = changes[0].decode().unwrap();
        assert_eq!(typed.before.unwrap().status, "pending");
        assert_eq!(typed.after.unwrap().status, "accepted");
        assert!(changes[0].name().ends_with("vetBookings/b1"));
    }

    #[test]
    fn test_create_and_delete() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(current());

        let created = tracker.apply(booking_change("b2", "pending", "t1"));
        assert!(created[0].is_create());

        let deleted = tracker.apply(response(json!({
            "documentDelete": {
                "document": "projects/p/databases/(default)/documents/vetBookings/b2",
                "removedTargetIds": [1]
            }
        })));
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].is_delete());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_resync_skips_unchanged_documents() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(booking_change("b1", "pending", "t1"));
        tracker.apply(current());

        // Reconnect: the server replays the same version, then a newer one.
        assert!(tracker.apply(booking_change("b1", "pending", "t1")).is_empty());
        assert_eq!(tracker.apply(booking_change("b1", "done", "t3")).len(), 1);
    }

    #[test]
    fn test_removed_target_is_treated_as_delete() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(booking_change("b1", "pending", "t1"));
        tracker.apply(current());

        let changes = tracker.apply(response(json!({
            "documentChange": {
                "document": {
                    "name": "projects/p/databases/(default)/documents/vetBookings/b1",
                    "fields": {},
                    "updateTime": "t2"
                },
                "removedTargetIds": [1]
            }
        })));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_delete());
    }

    fn reset() -> ListenResponse {
        response(json!({ "targetChange": { "targetChangeType": "RESET", "targetIds": [1] } }))
    }

    fn snapshot_at(read_time: &str) -> ListenResponse {
        response(json!({
            "targetChange": { "targetChangeType": "CURRENT", "readTime": read_time }
        }))
    }

    fn message(id: usize, created: &str, updated: &str) -> ListenResponse {
        response(json!({
            "documentChange": {
                "document": {
                    "name": format!("projects/p/databases/(default)/documents/chats/c1/messages/m{}", id),
                    "fields": { "text": { "stringValue": "hi" } },
                    "createTime": created,
                    "updateTime": updated
                },
                "targetIds": [1]
            }
        }))
    }

    #[test]
    fn test_reset_drops_documents_not_resent() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(booking_change("b1", "pending", "t1"));
        tracker.apply(booking_change("b2", "pending", "t1"));
        tracker.apply(current());
        assert_eq!(tracker.len(), 2);

        assert!(tracker.apply(reset()).is_empty());
        assert!(tracker.apply(booking_change("b1", "pending", "t1")).is_empty());

        let changes = tracker.apply(current());
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_delete());
        assert!(changes[0].name().ends_with("vetBookings/b2"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_reset_before_first_snapshot_is_silent() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(booking_change("b1", "pending", "t1"));
        tracker.apply(reset());
        tracker.apply(booking_change("b2", "pending", "t1"));

        assert!(tracker.apply(current()).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_creates_only_keeps_nothing() {
        let mut tracker = ChangeTracker::creates_only();
        tracker.apply(snapshot_at("2025-03-01T09:00:00Z"));

        let mut created = 0;
        for id in 0..10_000 {
            let changes = tracker.apply(message(id, "2025-03-01T09:30:00Z", "2025-03-01T09:30:00Z"));
            created += changes.iter().filter(|c| c.is_create()).count();
        }

        assert_eq!(created, 10_000);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_creates_only_ignores_edits_and_deletes() {
        let mut tracker = ChangeTracker::creates_only();
        tracker.apply(message(1, "2025-03-01T08:00:00Z", "2025-03-01T08:00:00Z"));
        tracker.apply(snapshot_at("2025-03-01T09:00:00Z"));

        assert!(tracker
            .apply(message(1, "2025-03-01T08:00:00Z", "2025-03-01T09:10:00Z"))
            .is_empty());
        assert!(tracker
            .apply(response(json!({
                "documentDelete": {
                    "document": "projects/p/databases/(default)/documents/chats/c1/messages/m1"
                }
            })))
            .is_empty());
    }

    #[test]
    fn test_creates_only_resync_reports_only_newer_documents() {
        let mut tracker = ChangeTracker::creates_only();
        tracker.apply(snapshot_at("2025-03-01T09:00:00Z"));

        tracker.apply(reset());
        assert!(tracker
            .apply(message(1, "2025-03-01T08:00:00Z", "2025-03-01T08:00:00Z"))
            .is_empty());
        let changes = tracker.apply(message(2, "2025-03-01T09:05:00.5Z", "2025-03-01T09:05:00.5Z"));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].name().ends_with("messages/m2"));

        assert!(tracker.apply(snapshot_at("2025-03-01T09:06:00Z")).is_empty());
    }
}

use super::listen::{listen_request, ListenStream};
use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, Direction, FieldFilter, FieldOperator,
    FieldReference, Filter, ListenRequest, Order, QueryTarget, RunQueryRequest, RunQueryResponse,
    StructuredQuery, Target, Value,
};
use super::reference::convert_serde_value_to_firestore_value;
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::{FirebaseFirestore, FirestoreError};
use crate::core::parse_error_response;
use reqwest::header;
use serde::Serialize;

/// A definition of a Firestore query, including the target collection and filters.
///
/// Queries are built independently of a client and attached with
/// `FirebaseFirestore::query`, so the same definition can be both run and listened to.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) query: StructuredQuery,
}

impl Query {
    /// Creates a new `Query` over the root-level collection `collection_id`.
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self::from_selector(collection_id.into(), false)
    }

    /// Creates a query over every collection named `collection_id`, at any depth
    /// (e.g. all `messages` subcollections of all chats).
    pub fn collection_group(collection_id: impl Into<String>) -> Self {
        Self::from_selector(collection_id.into(), true)
    }

    fn from_selector(collection_id: String, all_descendants: bool) -> Self {
        Self {
            query: StructuredQuery {
                from: vec![CollectionSelector {
                    collection_id,
                    all_descendants,
                }],
                ..Default::default()
            },
        }
    }

    /// Adds a filter to the query, converting `value` through serde.
    pub fn where_filter<T: Serialize>(
        self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        let serde_value = serde_json::to_value(value)?;
        let firestore_value = convert_serde_value_to_firestore_value(serde_value)?;
        Ok(self.where_value(field, op, firestore_value))
    }

    /// Adds a filter with an already-encoded Firestore value.
    ///
    /// Filters are AND-ed together.
    pub fn where_value(mut self, field: &str, op: FieldOperator, value: Value) -> Self {
        let filter = Filter::FieldFilter(FieldFilter {
            field: FieldReference {
                field_path: field.to_string(),
            },
            op,
            value,
        });

        self.query.where_clause = Some(match self.query.where_clause.take() {
            None => filter,
            Some(Filter::CompositeFilter(mut cf)) if cf.op == CompositeOperator::And => {
                cf.filters.push(filter);
                Filter::CompositeFilter(cf)
            }
            Some(existing) => Filter::CompositeFilter(CompositeFilter {
                op: CompositeOperator::And,
                filters: vec![existing, filter],
            }),
        });

        self
    }

    /// Sorts the query results by the specified field.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.query.order_by.push(Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        });
        self
    }

    /// Limits the number of documents returned.
    pub fn limit(mut self, limit: i32) -> Self {
        self.query.limit = Some(limit);
        self
    }
}

/// A `Query` attached to a Firestore client, ready for execution.
#[derive(Clone)]
pub struct ExecutableQuery<'a> {
    pub(crate) db: &'a FirebaseFirestore,
    pub(crate) query: Query,
}

impl<'a> ExecutableQuery<'a> {
    pub(crate) fn new(db: &'a FirebaseFirestore, query: Query) -> Self {
        Self { db, query }
    }

    /// Executes the query and returns the results as a `QuerySnapshot`.
    pub async fn get(&self) -> Result<QuerySnapshot, FirestoreError> {
        let request = RunQueryRequest {
            structured_query: self.query.query.clone(),
        };

        let response = self
            .db
            .client()
            .post(self.db.rpc_url("runQuery"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Run query failed").await,
            ));
        }

        let responses: Vec<RunQueryResponse> = response.json().await?;

        let mut snapshot = QuerySnapshot::default();
        for res in responses {
            if let Some(rt) = res.read_time {
                snapshot.read_time = Some(rt);
            }
            if let Some(doc) = res.document {
                snapshot.documents.push(DocumentSnapshot::from_document(doc));
            }
        }

        Ok(snapshot)
    }

    /// Listens to changes to the query results.
    ///
    /// `resume_token` continues a previous stream without re-sending unchanged documents.
    pub async fn listen(&self, resume_token: Option<String>) -> Result<ListenStream, FirestoreError> {
        let request = ListenRequest {
            database: self.db.database().to_string(),
            add_target: Target {
                query: QueryTarget {
                    parent: self.db.documents_root(),
                    structured_query: self.query.query.clone(),
                },
                target_id: 1,
                resume_token,
            },
        };

        listen_request(self.db, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_filters_are_anded() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let query = Query::new("vetBookings")
            .where_value("date", FieldOperator::GreaterThanOrEqual, Value::timestamp(from))
            .where_value("date", FieldOperator::LessThanOrEqual, Value::timestamp(to))
            .where_filter("status", FieldOperator::Equal, "accepted")
            .unwrap();

        let encoded = serde_json::to_value(&query.query).unwrap();
        assert_eq!(
            encoded,
            json!({
                "from": [{ "collectionId": "vetBookings" }],
                "where": {
                    "compositeFilter": {
                        "op": "AND",
                        "filters": [
                            { "fieldFilter": {
                                "field": { "fieldPath": "date" },
                                "op": "GREATER_THAN_OR_EQUAL",
                                "value": { "timestampValue": "2025-01-01T10:00:00.000000Z" }
                            }},
                            { "fieldFilter": {
                                "field": { "fieldPath": "date" },
                                "op": "LESS_THAN_OR_EQUAL",
                                "value": { "timestampValue": "2025-01-01T11:00:00.000000Z" }
                            }},
                            { "fieldFilter": {
                                "field": { "fieldPath": "status" },
                                "op": "EQUAL",
                                "value": { "stringValue": "accepted" }
                            }}
                        ]
                    }
                }
            })
        );
    }

    #[test]
    fn test_collection_group_with_order_and_limit() {
        let query = Query::collection_group("messages")
            .order_by("createdAt", Direction::Descending)
            .limit(5);

        let encoded = serde_json::to_value(&query.query).unwrap();
        assert_eq!(
            encoded,
            json!({
                "from": [{ "collectionId": "messages", "allDescendants": true }],
                "orderBy": [{ "field": { "fieldPath": "createdAt" }, "direction": "DESCENDING" }],
                "limit": 5
            })
        );
    }
}

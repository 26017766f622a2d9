use super::models::{
    ArrayValue, CommitRequest, Document, DocumentTransform, FieldTransform, ListDocumentsResponse,
    MapValue, Value, Write, TIMESTAMP_SENTINEL,
};
use super::snapshot::DocumentSnapshot;
use super::{FirebaseFirestore, FirestoreError};
use crate::core::parse_error_response;
use reqwest::{header, StatusCode};
use serde::de::{DeserializeOwned, Error};
use serde::ser::Error as SerError;
use serde::Serialize;
use serde_json::map::Map;
use serde_json::Value as SerdeValue;
use std::collections::HashMap;

// Helper to convert Firestore's value map to a standard serde_json::Value
pub(crate) fn convert_fields_to_serde_value(
    fields: &HashMap<String, Value>,
) -> Result<SerdeValue, FirestoreError> {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key.clone(), convert_value_to_serde_value(value)?);
    }
    Ok(SerdeValue::Object(map))
}

pub(crate) fn convert_value_to_serde_value(value: &Value) -> Result<SerdeValue, FirestoreError> {
    use serde_json::json;
    Ok(match value {
        Value::StringValue(s) => SerdeValue::String(s.clone()),
        Value::IntegerValue(s) => {
            let i: i64 = s.parse().map_err(|e| {
                <serde_json::Error as Error>::custom(format!(
                    "Failed to parse integer string '{}': {}",
                    s, e
                ))
            })?;
            SerdeValue::Number(i.into())
        }
        Value::DoubleValue(d) => SerdeValue::Number(serde_json::Number::from_f64(*d).ok_or_else(
            || <serde_json::Error as Error>::custom(format!("Invalid f64 value: {}", d)),
        )?),
        Value::BooleanValue(b) => SerdeValue::Bool(*b),
        Value::MapValue(map_value) => convert_fields_to_serde_value(&map_value.fields)?,
        Value::ArrayValue(array_value) => SerdeValue::Array(
            array_value
                .values
                .iter()
                .map(convert_value_to_serde_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::NullValue(_) => SerdeValue::Null,
        Value::TimestampValue(s) => SerdeValue::String(s.clone()),
        Value::GeoPointValue(gp) => json!({ "latitude": gp.latitude, "longitude": gp.longitude }),
        Value::BytesValue(s) => SerdeValue::String(s.clone()),
        Value::ReferenceValue(s) => SerdeValue::String(s.clone()),
    })
}

// Helper to convert a serializable Rust struct to Firestore's value map
pub(crate) fn convert_serializable_to_fields<T: Serialize>(
    value: &T,
) -> Result<HashMap<String, Value>, FirestoreError> {
    match serde_json::to_value(value)? {
        SerdeValue::Object(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, convert_serde_value_to_firestore_value(v)?)))
            .collect(),
        _ => Err(FirestoreError::SerializationError(SerError::custom(
            "Can only set objects as documents",
        ))),
    }
}

pub(crate) fn convert_serde_value_to_firestore_value(
    value: SerdeValue,
) -> Result<Value, FirestoreError> {
    Ok(match value {
        SerdeValue::Null => Value::NullValue(()),
        SerdeValue::Bool(b) => Value::BooleanValue(b),
        SerdeValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::IntegerValue(i.to_string())
            } else if let Some(f) = n.as_f64() {
                Value::DoubleValue(f)
            } else {
                return Err(FirestoreError::SerializationError(SerError::custom(format!(
                    "Unsupported number type: {}",
                    n
                ))));
            }
        }
        SerdeValue::String(s) => Value::StringValue(s),
        SerdeValue::Array(a) => Value::ArrayValue(ArrayValue {
            values: a
                .into_iter()
                .map(convert_serde_value_to_firestore_value)
                .collect::<Result<Vec<_>, _>>()?,
        }),
        SerdeValue::Object(o) => {
            if o.len() == 1 {
                if let Some(SerdeValue::String(ts)) = o.get(TIMESTAMP_SENTINEL) {
                    return Ok(Value::TimestampValue(ts.clone()));
                }
            }
            let fields = o
                .into_iter()
                .map(|(k, v)| Ok((k, convert_serde_value_to_firestore_value(v)?)))
                .collect::<Result<HashMap<_, _>, FirestoreError>>()?;
            Value::MapValue(MapValue { fields })
        }
    })
}

/// Deserializes the fields of a raw document into `T`.
pub fn decode_document<T: DeserializeOwned>(document: &Document) -> Result<T, FirestoreError> {
    let serde_value = convert_fields_to_serde_value(&document.fields)?;
    Ok(serde_json::from_value(serde_value)?)
}

async fn ensure_success(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, FirestoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(FirestoreError::ApiError(
            parse_error_response(response, context).await,
        ))
    }
}

#[derive(Clone)]
pub struct DocumentReference<'a> {
    pub(crate) db: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> DocumentReference<'a> {
    /// The slash-separated path relative to the document root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Gets a subcollection of this document.
    pub fn collection(&self, collection_id: &str) -> CollectionReference<'a> {
        CollectionReference {
            db: self.db,
            path: format!("{}/{}", self.path, collection_id),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        self.get_snapshot().await?.data()
    }

    pub async fn get_snapshot(&self) -> Result<DocumentSnapshot, FirestoreError> {
        let response = self.db.client().get(self.db.url_for(&self.path)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DocumentSnapshot::missing(self.id()));
        }

        let response = ensure_success(response, "Get document failed").await?;
        let doc: Document = response.json().await?;
        Ok(DocumentSnapshot::from_document(doc))
    }

    /// Overwrites the whole document, creating it if needed.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), FirestoreError> {
        self.patch(value, None).await
    }

    /// Writes only the fields named in `update_mask`, keeping every other field.
    ///
    /// Creates the document if it does not exist, which gives "set with merge" semantics
    /// for the masked fields.
    pub async fn update<T: Serialize>(
        &self,
        value: &T,
        update_mask: &[&str],
    ) -> Result<(), FirestoreError> {
        self.patch(value, Some(update_mask)).await
    }

    async fn patch<T: Serialize>(
        &self,
        value: &T,
        update_mask: Option<&[&str]>,
    ) -> Result<(), FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let mut request = self
            .db
            .client()
            .patch(self.db.url_for(&self.path))
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(mask) = update_mask {
            let params: Vec<(&str, &str)> =
                mask.iter().map(|field| ("updateMask.fieldPaths", *field)).collect();
            request = request.query(&params);
        }

        let response = request.body(body).send().await?;
        let context = if update_mask.is_some() {
            "Update document failed"
        } else {
            "Set document failed"
        };
        ensure_success(response, context).await?;

        Ok(())
    }

    /// Creates the document, failing with [`FirestoreError::AlreadyExists`] if it exists.
    pub async fn create<T: Serialize>(&self, value: &T) -> Result<Document, FirestoreError> {
        let (parent, id) = match self.path.rsplit_once('/') {
            Some(parts) => parts,
            None => {
                return Err(FirestoreError::ApiError(format!(
                    "Invalid document path: {}",
                    self.path
                )))
            }
        };

        CollectionReference {
            db: self.db,
            path: parent.to_string(),
        }
        .create(id, value)
        .await
    }

    /// Removes every occurrence of `values` from the array field `field_path`.
    pub async fn array_remove(
        &self,
        field_path: &str,
        values: Vec<Value>,
    ) -> Result<(), FirestoreError> {
        let write = Write {
            transform: DocumentTransform {
                document: self.db.resource_name(&self.path),
                field_transforms: vec![FieldTransform {
                    field_path: field_path.to_string(),
                    remove_all_from_array: ArrayValue { values },
                }],
            },
        };

        let request = CommitRequest {
            writes: vec![write],
        };

        let response = self
            .db
            .client()
            .post(self.db.rpc_url("commit"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        ensure_success(response, "Commit failed").await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self.db.client().delete(self.db.url_for(&self.path)).send().await?;
        ensure_success(response, "Delete document failed").await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct CollectionReference<'a> {
    pub(crate) db: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> CollectionReference<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn doc(&self, document_id: &str) -> DocumentReference<'a> {
        DocumentReference {
            db: self.db,
            path: format!("{}/{}", self.path, document_id),
        }
    }

    pub async fn list_documents(&self) -> Result<ListDocumentsResponse, FirestoreError> {
        let response = self.db.client().get(self.db.url_for(&self.path)).send().await?;
        let response = ensure_success(response, "List documents failed").await?;
        Ok(response.json().await?)
    }

    /// Creates a document with the given id in this collection.
    pub async fn create<T: Serialize>(
        &self,
        document_id: &str,
        value: &T,
    ) -> Result<Document, FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .db
            .client()
            .post(self.db.url_for(&self.path))
            .query(&[("documentId", document_id)])
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(FirestoreError::AlreadyExists(format!(
                "{}/{}",
                self.path, document_id
            )));
        }

        let response = ensure_success(response, "Create document failed").await?;
        Ok(response.json().await?)
    }
}

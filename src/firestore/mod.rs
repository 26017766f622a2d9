//! Cloud Firestore module.
//!
//! A thin client over the Firestore REST v1 API: collection and document references,
//! structured queries, and real-time `listen` streams.
//!
//! # Real-time Updates
//!
//! `ExecutableQuery::listen()` opens a streaming request and returns a [`ListenStream`] of
//! raw `ListenResponse` events. Feed those into a [`ChangeTracker`] to get before/after
//! [`Change`]s, which is what the trigger runtime consumes.

pub mod listen;
pub mod models;
pub mod query;
pub mod reference;
pub mod snapshot;
pub mod watch;


pub use self::listen::ListenStream;
pub use self::models::{Document, Timestamp, Value};
pub use self::query::{ExecutableQuery, Query};
pub use self::reference::{decode_document, CollectionReference, DocumentReference};
pub use self::snapshot::{DocumentSnapshot, QuerySnapshot};
pub use self::watch::{Change, ChangeTracker};

use crate::core::middleware::AuthMiddleware;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use thiserror::Error;

const FIRESTORE_V1_API: &str = "https://firestore.googleapis.com/v1";

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// A create was attempted on a document that already exists.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),
}

/// Client for interacting with Cloud Firestore.
#[derive(Clone)]
pub struct FirebaseFirestore {
    client: ClientWithMiddleware,
    api_root: String,
    database: String,
}

impl FirebaseFirestore {
    /// Creates a new `FirebaseFirestore` instance authenticated with the service account.
    ///
    /// This is typically called via `PetpalApp::from_settings()`.
    pub fn new(middleware: AuthMiddleware, project_id: &str) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(middleware)
            .build();

        Self::with_client(client, FIRESTORE_V1_API.to_string(), project_id)
    }

    /// Creates a client for the local Firestore emulator.
    ///
    /// The emulator treats `Bearer owner` as an admin credential, so no OAuth flow is needed.
    pub fn emulator(host: &str, project_id: &str) -> Result<Self, FirestoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer owner"));
        let inner = Client::builder().default_headers(headers).build()?;
        let client = ClientBuilder::new(inner).build();

        Ok(Self::with_client(
            client,
            format!("http://{}/v1", host),
            project_id,
        ))
    }

    /// Creates a `FirebaseFirestore` instance over an existing client and API root
    /// (e.g. `http://localhost:8080/v1`). Used by tests and the emulator.
    pub fn with_client(client: ClientWithMiddleware, api_root: String, project_id: &str) -> Self {
        Self {
            client,
            api_root: api_root.trim_end_matches('/').to_string(),
            database: format!("projects/{}/databases/(default)", project_id),
        }
    }

    /// The database resource name, `projects/{p}/databases/(default)`.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The resource name of the document tree root, `projects/{p}/databases/(default)/documents`.
    pub fn documents_root(&self) -> String {
        format!("{}/documents", self.database)
    }

    pub(crate) fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// Full resource name of a document or collection path.
    pub(crate) fn resource_name(&self, path: &str) -> String {
        format!("{}/documents/{}", self.database, path.trim_matches('/'))
    }

    pub(crate) fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, self.resource_name(path))
    }

    /// URL of an RPC on the document root, e.g. `runQuery` or `commit`.
    pub(crate) fn rpc_url(&self, method: &str) -> String {
        format!("{}/{}/documents:{}", self.api_root, self.database, method)
    }

    /// Gets a `CollectionReference` instance that refers to the collection at the specified path.
    ///
    /// # Arguments
    ///
    /// * `collection_path` - The slash-separated path of the collection (e.g. "users" or
    ///   "users/u1/security").
    pub fn collection(&self, collection_path: &str) -> CollectionReference<'_> {
        CollectionReference {
            db: self,
            path: collection_path.trim_matches('/').to_string(),
        }
    }

    /// Gets a `DocumentReference` instance that refers to the document at the specified path.
    ///
    /// # Arguments
    ///
    /// * `document_path` - The slash-separated path to the document (e.g., "users/user1").
    pub fn doc(&self, document_path: &str) -> DocumentReference<'_> {
        DocumentReference {
            db: self,
            path: document_path.trim_matches('/').to_string(),
        }
    }

    /// Creates an executable query from a query definition.
    pub fn query(&self, query: Query) -> ExecutableQuery<'_> {
        ExecutableQuery::new(self, query)
    }

    /// Queries every collection named `collection_id`, at any depth.
    pub fn collection_group(&self, collection_id: &str) -> ExecutableQuery<'_> {
        self.query(Query::collection_group(collection_id))
    }
}

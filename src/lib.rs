//! PetPal backend triggers.
//!
//! Thin Firebase clients (`firestore`, `messaging`, `auth`) and the handlers built on them
//! (`functions`). `runtime` and `server` deliver events to those handlers.

pub mod auth;
pub mod config;
pub mod core;
pub mod firestore;
pub mod functions;
pub mod logging;
pub mod messaging;
pub mod runtime;
pub mod server;

use crate::auth::{IdTokenVerifier, TokenVerifier};
use crate::config::Settings;
use crate::core::middleware::AuthMiddleware;
use crate::firestore::{FirebaseFirestore, FirestoreError};
use crate::messaging::FirebaseMessaging;
use crate::server::AppState;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read service account key {}: {source}", .path.display())]
    Credentials {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No service account key configured (firebase.credentials or GOOGLE_APPLICATION_CREDENTIALS)")]
    MissingCredentials,
    #[error("No Firebase project id configured")]
    MissingProjectId,
    #[error("Failed to build the Firestore client: {0}")]
    Firestore(#[from] FirestoreError),
}

/// The clients and settings every handler loop shares.
#[derive(Clone)]
pub struct PetpalApp {
    pub db: FirebaseFirestore,
    pub messaging: FirebaseMessaging,
    pub verifier: Arc<dyn TokenVerifier>,
    pub settings: Arc<Settings>,
}

impl PetpalApp {
    pub fn new(
        db: FirebaseFirestore,
        messaging: FirebaseMessaging,
        verifier: Arc<dyn TokenVerifier>,
        settings: Settings,
    ) -> Self {
        Self {
            db,
            messaging,
            verifier,
            settings: Arc::new(settings),
        }
    }

    /// Builds the clients from settings.
    ///
    /// With a Firestore emulator configured the service account is optional; without one
    /// FCM sends go out unauthenticated and fail.
    pub async fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let emulator = settings.firebase.emulator_host();

        let middleware = match settings.firebase.credentials_path() {
            Some(path) => {
                let key = yup_oauth2::read_service_account_key(&path)
                    .await
                    .map_err(|source| AppError::Credentials { path, source })?;
                Some(AuthMiddleware::new(key))
            }
            None if emulator.is_some() => None,
            None => return Err(AppError::MissingCredentials),
        };

        let project_id = settings
            .firebase
            .project_id
            .clone()
            .or_else(|| {
                middleware
                    .as_ref()
                    .and_then(|m| m.project_id())
                    .map(str::to_string)
            })
            .ok_or(AppError::MissingProjectId)?;

        let db = match (&emulator, &middleware) {
            (Some(host), _) => {
                tracing::info!(host = %host, "using the Firestore emulator");
                FirebaseFirestore::emulator(host, &project_id)?
            }
            (None, Some(middleware)) => FirebaseFirestore::new(middleware.clone(), &project_id),
            (None, None) => return Err(AppError::MissingCredentials),
        };

        let messaging = match middleware {
            Some(middleware) => FirebaseMessaging::new(middleware, &project_id),
            None => {
                tracing::warn!("no service account key; push notifications will fail");
                FirebaseMessaging::with_client(
                    ClientBuilder::new(Client::new()).build(),
                    "https://fcm.googleapis.com/v1".to_string(),
                    &project_id,
                )
            }
        };

        let verifier: Arc<dyn TokenVerifier> = Arc::new(IdTokenVerifier::new(project_id.as_str()));

        tracing::info!(project_id = %project_id, "Firebase clients ready");
        Ok(Self::new(db, messaging, verifier, settings))
    }

    pub fn server_state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            messaging: self.messaging.clone(),
            verifier: self.verifier.clone(),
            settings: self.settings.clone(),
        }
    }
}

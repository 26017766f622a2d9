use crate::core::middleware::AuthMiddleware;
use crate::core::FirebaseErrorResponse;
use crate::messaging::models::{
    BatchResponse, Message, MulticastMessage, SendError, SendResponse, SendResponseInternal,
};
use futures::future::join_all;
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use thiserror::Error;

pub mod models;

const FCM_V1_API: &str = "https://fcm.googleapis.com/v1";

/// FCM's limit on tokens per multicast.
pub const MAX_MULTICAST_TOKENS: usize = 500;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("FCM rejected the message ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    Rejected {
        code: Option<String>,
        message: String,
        fields: Vec<String>,
    },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl MessagingError {
    /// Whether FCM rejected the message because its target token is dead.
    pub fn is_dead_token(&self) -> bool {
        match self {
            MessagingError::Rejected { code, fields, .. } => {
                models::token_is_dead(code.as_deref(), fields)
            }
            _ => false,
        }
    }

    fn into_send_error(self) -> SendError {
        match self {
            MessagingError::Rejected {
                code,
                message,
                fields,
            } => SendError {
                code,
                message,
                fields,
            },
            other => SendError {
                code: None,
                message: other.to_string(),
                fields: Vec::new(),
            },
        }
    }
}

#[derive(Clone)]
pub struct FirebaseMessaging {
    client: ClientWithMiddleware,
    send_url: String,
}

// Wrapper for the request body required by FCM v1 API
#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a Message,
}

impl FirebaseMessaging {
    pub fn new(middleware: AuthMiddleware, project_id: &str) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(middleware)
            .build();

        Self::with_client(client, FCM_V1_API.to_string(), project_id)
    }

    /// Creates a messaging client over an existing client and API root (e.g. a mock server).
    pub fn with_client(client: ClientWithMiddleware, api_root: String, project_id: &str) -> Self {
        Self {
            client,
            send_url: format!(
                "{}/projects/{}/messages:send",
                api_root.trim_end_matches('/'),
                project_id
            ),
        }
    }

    pub async fn send(&self, message: &Message) -> Result<String, MessagingError> {
        validate_message(message)?;
        self.send_request(message).await
    }

    async fn send_request(&self, message: &Message) -> Result<String, MessagingError> {
        let request = SendRequest { message };

        let response = self
            .client
            .post(&self.send_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<FirebaseErrorResponse>(&text) {
                Ok(error) => MessagingError::Rejected {
                    code: error
                        .detail_error_code()
                        .map(str::to_string)
                        .or_else(|| error.error.status.clone()),
                    fields: error.field_violations(),
                    message: error.error.message,
                },
                Err(_) => MessagingError::ApiError(format!("FCM send failed {}: {}", status, text)),
            });
        }

        let result: SendResponseInternal = response.json().await?;
        Ok(result.name)
    }

    /// Sends every message concurrently; per-message failures land in the [`BatchResponse`].
    async fn send_each_request(&self, messages: &[Message]) -> Result<BatchResponse, MessagingError> {
        if messages.len() > MAX_MULTICAST_TOKENS {
            return Err(MessagingError::InvalidMessage(format!(
                "Cannot send more than {} messages in a single batch.",
                MAX_MULTICAST_TOKENS
            )));
        }

        let results = join_all(messages.iter().map(|message| self.send_request(message))).await;

        let responses = results
            .into_iter()
            .map(|result| match result {
                Ok(message_id) => SendResponse {
                    success: true,
                    message_id: Some(message_id),
                    error: None,
                },
                Err(e) => SendResponse {
                    success: false,
                    message_id: None,
                    error: Some(e.into_send_error()),
                },
            })
            .collect();

        Ok(BatchResponse::from_responses(responses))
    }

    /// Sends the same notification to every token in `message.tokens`.
    ///
    /// The legacy batch endpoint is gone, so this fans out to one v1 send per token.
    pub async fn send_each_for_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<BatchResponse, MessagingError> {
        if message.tokens.is_empty() {
            return Err(MessagingError::InvalidMessage(
                "tokens must be a non-empty array".to_string(),
            ));
        }

        let messages: Vec<Message> = message
            .tokens
            .iter()
            .map(|token| message.for_token(token))
            .collect();

        self.send_each_request(&messages).await
    }
}

fn validate_message(message: &Message) -> Result<(), MessagingError> {
    let num_targets = [
        message.token.is_some(),
        message.topic.is_some(),
        message.condition.is_some(),
    ]
    .iter()
    .filter(|&&t| t)
    .count();

    if num_targets != 1 {
        return Err(MessagingError::InvalidMessage(
            "Message must have exactly one of token, topic, or condition.".to_string(),
        ));
    }

    Ok(())
}

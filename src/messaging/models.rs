use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a message to be sent via FCM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Arbitrary key/value payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,

    /// Basic notification template to use across all platforms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,

    /// Registration token to send a message to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Topic name to send a message to, without the "/topics/" prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Condition to send a message to, e.g. "'foo' in topics && 'bar' in topics".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Basic notification template to use across all platforms.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// The URL of an image to be downloaded on the device and displayed in the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
            image: None,
        }
    }
}

/// The same notification addressed to many registration tokens.
#[derive(Debug, Clone, Default)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub data: Option<HashMap<String, String>>,
    pub notification: Option<Notification>,
}

impl MulticastMessage {
    /// The per-token message sent for `token`.
    pub(crate) fn for_token(&self, token: &str) -> Message {
        Message {
            data: self.data.clone(),
            notification: self.notification.clone(),
            token: Some(token.to_string()),
            ..Default::default()
        }
    }
}

/// Response from a batch send operation.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    /// The number of messages successfully sent.
    pub success_count: usize,
    /// The number of messages that failed to send.
    pub failure_count: usize,
    /// One response per message, in request order.
    pub responses: Vec<SendResponse>,
}

impl BatchResponse {
    pub(crate) fn from_responses(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        Self {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        }
    }
}

/// Response for an individual message in a batch.
#[derive(Debug, Clone)]
pub struct SendResponse {
    pub success: bool,
    /// The message ID, if sent successfully.
    pub message_id: Option<String>,
    /// The failure, if any.
    pub error: Option<SendError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendError {
    /// FCM error code (e.g. `UNREGISTERED`) or the canonical status when no code was given.
    pub code: Option<String>,
    pub message: String,
    /// Request fields FCM blamed for an `INVALID_ARGUMENT`, e.g. `message.token`.
    pub fields: Vec<String>,
}

impl SendError {
    /// Whether the registration token will never work again and should be dropped.
    ///
    /// `INVALID_ARGUMENT` also covers payload problems, so it only counts when FCM
    /// names `message.token` as the offending field.
    pub fn is_dead_token(&self) -> bool {
        token_is_dead(self.code.as_deref(), &self.fields)
    }
}

pub(crate) fn token_is_dead(code: Option<&str>, fields: &[String]) -> bool {
    match code {
        Some("UNREGISTERED") | Some("registration-token-not-registered") => true,
        Some("INVALID_ARGUMENT") => fields.iter().any(|f| f == "message.token"),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendResponseInternal {
    pub name: String,
}

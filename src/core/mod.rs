pub mod middleware;

use serde::Deserialize;

/// Standard Google API error envelope.
#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        match &self.error.status {
            Some(status) => format!("{} ({}, code: {})", self.error.message, status, self.error.code),
            None => format!("{} (code: {})", self.error.message, self.error.code),
        }
    }

    /// Returns the `errorCode` carried by a typed error detail, if any
    /// (FCM reports `UNREGISTERED` and friends this way).
    pub fn detail_error_code(&self) -> Option<&str> {
        self.error
            .details
            .iter()
            .find_map(|d| d.get("errorCode").and_then(|c| c.as_str()))
    }

    /// Field paths named by `google.rpc.BadRequest` details, e.g. `message.token`.
    pub fn field_violations(&self) -> Vec<String> {
        self.error
            .details
            .iter()
            .filter_map(|d| d.get("fieldViolations").and_then(|v| v.as_array()))
            .flatten()
            .filter_map(|v| v.get("field").and_then(|f| f.as_str()))
            .map(str::to_string)
            .collect()
    }
}

pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    match response.json::<FirebaseErrorResponse>().await {
        Ok(error_resp) => error_resp.display_message(),
        Err(_) => format!("{}: {}", default_msg, status),
    }
}

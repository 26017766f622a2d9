use super::{get_user_tokens, notify_token, FunctionError};
use crate::firestore::{FirebaseFirestore, Timestamp};
use crate::messaging::FirebaseMessaging;
use serde::{Deserialize, Serialize};

pub const CHATS_COLLECTION: &str = "chats";
pub const MESSAGES_COLLECTION: &str = "messages";

const PREVIEW_CHARS: usize = 100;
const DEFAULT_TITLE: &str = "New message";
const ATTACHMENT_BODY: &str = "Sent an attachment";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Default, Deserialize)]
struct Chat {
    #[serde(default)]
    participants: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSummary<'a> {
    last_message: &'a str,
    last_message_at: Timestamp,
    last_sender_id: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatDispatch {
    /// The parent chat does not exist; nothing was written.
    ChatMissing,
    Updated {
        recipient: Option<String>,
        delivered: bool,
    },
}

pub async fn on_message_created(
    db: &FirebaseFirestore,
    fcm: &FirebaseMessaging,
    chat_id: &str,
    message: &ChatMessage,
) -> Result<ChatDispatch, FunctionError> {
    let chat_ref = db.collection(CHATS_COLLECTION).doc(chat_id);

    let Some(chat) = chat_ref.get::<Chat>().await? else {
        tracing::warn!(chat_id, "message for a missing chat");
        return Ok(ChatDispatch::ChatMissing);
    };

    let summary = ChatSummary {
        last_message: &message.text,
        last_message_at: message.created_at.unwrap_or_else(Timestamp::now),
        last_sender_id: &message.sender_id,
    };
    chat_ref
        .update(&summary, &["lastMessage", "lastMessageAt", "lastSenderId"])
        .await?;

    let Some(recipient) = chat
        .participants
        .into_iter()
        .find(|uid| *uid != message.sender_id)
    else {
        tracing::debug!(chat_id, "no other participant to notify");
        return Ok(ChatDispatch::Updated {
            recipient: None,
            delivered: false,
        });
    };

    let tokens = get_user_tokens(db, &recipient).await?;
    let delivered = match tokens.last() {
        Some(token) => {
            let title = message
                .sender_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_TITLE);
            notify_token(db, fcm, &recipient, token, title, &preview(&message.text)).await?
        }
        None => {
            tracing::debug!(chat_id, recipient = %recipient, "recipient has no push tokens");
            false
        }
    };

    Ok(ChatDispatch::Updated {
        recipient: Some(recipient),
        delivered,
    })
}

/// The notification body for a message text.
pub(crate) fn preview(text: &str) -> String {
    if text.is_empty() {
        return ATTACHMENT_BODY.to_string();
    }
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(PREVIEW_CHARS).collect();
    truncated.push('…');
    truncated
}

/// Extracts the chat id from a message's resource name
/// (`.../documents/chats/{chatId}/messages/{messageId}`).
pub fn chat_id_from_message_name(name: &str) -> Option<&str> {
    let mut segments = name.rsplit('/');
    let _message_id = segments.next()?;
    if segments.next()? != MESSAGES_COLLECTION {
        return None;
    }
    let chat_id = segments.next()?;
    (segments.next()? == CHATS_COLLECTION).then_some(chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview(""), "Sent an attachment");
        assert_eq!(preview("hello"), "hello");

        let exact = "a".repeat(100);
        assert_eq!(preview(&exact), exact);

        let long = "é".repeat(150);
        let body = preview(&long);
        assert_eq!(body.chars().count(), 101);
        assert!(body.ends_with('…'));
    }

    #[test]
    fn test_chat_id_from_message_name() {
        assert_eq!(
            chat_id_from_message_name(
                "projects/p/databases/(default)/documents/chats/c1/messages/m1"
            ),
            Some("c1")
        );
        assert_eq!(
            chat_id_from_message_name("projects/p/databases/(default)/documents/rooms/c1/messages/m1"),
            None
        );
        assert_eq!(chat_id_from_message_name("messages/m1"), None);
    }
}

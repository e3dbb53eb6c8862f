use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::roster::string_or_number;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "user_full_name", default)]
    pub author: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn line(&self) -> String {
        format!("{}: {}", self.author.as_deref().unwrap_or("Unknown"), self.content)
    }
}

/// Validated outgoing message body.
pub fn outgoing(input: &str) -> Result<String> {
    if input.trim().is_empty() {
        return Err(ClientError::Validation("Message is empty.".into()));
    }
    Ok(input.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.messages.iter().map(ChatMessage::line).collect()
    }

    /// The backend is the source of truth: a poll replaces the log.
    pub fn replace(&mut self, polled: Vec<ChatMessage>) {
        self.messages = polled;
    }

    /// Appends a message we sent or that was pushed over the socket. Returns
    /// false when a message with that id is already shown.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Appends what the backend saved for our own post; the author falls
    /// back to the local display name when the backend leaves it out.
    pub fn append_sent(&mut self, mut saved: ChatMessage, self_name: &str) -> bool {
        if saved.author.as_deref().map_or(true, str::is_empty) {
            saved.author = Some(self_name.to_string());
        }
        self.append(saved)
    }
}

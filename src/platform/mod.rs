pub mod sidecar;
pub mod whatsapp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender address WhatsApp uses for status updates
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Opaque, stable identifier of a chat (a WhatsApp JID such as `1203...@g.us`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    #[cfg(test)]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat as reported by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    /// Display name; empty for unnamed direct chats
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
}

/// A message received from the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    /// Sender address; for group messages this is the group itself
    pub from: String,
    /// Group member who wrote the message, when sent in a group
    #[serde(default)]
    pub author: Option<String>,
    /// Text body or media caption; empty for media without caption
    #[serde(default)]
    pub body: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default = "default_message_type", rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_message_type() -> String {
    "chat".to_string()
}

impl IncomingMessage {
    pub fn is_status_broadcast(&self) -> bool {
        self.from == STATUS_BROADCAST
    }
}

/// Lifecycle and message events surfaced by the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// First-time login: the operator has to scan this code
    Qr(String),
    Ready,
    Message(IncomingMessage),
    AuthFailure(String),
    Disconnected(String),
}

/// Operations the bot needs from an authenticated messaging session.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Every chat visible to the session
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BridgeError>;

    /// Look up a single chat
    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatSummary, BridgeError>;

    /// Send `text` as a reply quoting `message`
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge connection closed")]
    Closed,
    #[error("bridge rejected {request}: {message}")]
    Rejected { request: &'static str, message: String },
    #[error("unexpected bridge response to {request}: {got}")]
    UnexpectedResponse { request: &'static str, got: String },
    #[error("failed to encode bridge request: {0}")]
    Encode(#[from] serde_json::Error),
}

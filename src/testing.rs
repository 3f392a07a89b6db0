//! In-memory stand-ins for the bridge and the generator.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{GenerationError, ReplyGenerator};
use crate::platform::{BridgeError, ChatId, ChatSession, ChatSummary, IncomingMessage};

pub const TEAM: &str = "1@g.us";

pub fn chat(id: &str, name: &str, is_group: bool) -> ChatSummary {
    ChatSummary {
        id: ChatId::new(id),
        name: name.to_string(),
        is_group,
    }
}

pub fn message(id: &str, chat: &str, body: &str) -> IncomingMessage {
    IncomingMessage {
        id: id.to_string(),
        from: chat.to_string(),
        author: Some("5@c.us".to_string()),
        body: body.to_string(),
        chat_id: ChatId::new(chat),
        from_me: false,
        has_media: false,
        message_type: "chat".to_string(),
        timestamp: None,
    }
}

#[derive(Default)]
pub struct FakeSession {
    pub chats: Vec<ChatSummary>,
    pub fail_list: bool,
    pub fail_send: bool,
    pub list_calls: AtomicUsize,
    /// (message id, reply text) in send order
    pub replies: Mutex<Vec<(String, String)>>,
}

impl FakeSession {
    pub fn with_chats(chats: Vec<ChatSummary>) -> Self {
        Self {
            chats,
            ..Default::default()
        }
    }

    /// "Team Chat" and "Random" groups plus a direct chat with Alice
    pub fn standard() -> Self {
        Self::with_chats(vec![
            chat(TEAM, "Team Chat", true),
            chat("2@g.us", "Random", true),
            chat("5@c.us", "Alice", false),
        ])
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub async fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().await.clone()
    }
}

#[async_trait]
impl ChatSession for FakeSession {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BridgeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(BridgeError::Closed);
        }
        Ok(self.chats.clone())
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatSummary, BridgeError> {
        self.chats
            .iter()
            .find(|chat| &chat.id == chat_id)
            .cloned()
            .ok_or_else(|| BridgeError::Rejected {
                request: "get_chat",
                message: "no such chat".to_string(),
            })
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), BridgeError> {
        if self.fail_send {
            return Err(BridgeError::Closed);
        }
        self.replies
            .lock()
            .await
            .push((message.id.clone(), text.to_string()));
        Ok(())
    }
}

pub struct FakeGenerator {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate(&self, _message: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().ok_or(GenerationError::EmptyCandidates)
    }
}

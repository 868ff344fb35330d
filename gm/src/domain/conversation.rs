//! Conversation and Message domain types

use goalstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::blueprint::Blueprint;
use super::id::generate_id;

/// Longest title derived from a first message
const TITLE_MAX_CHARS: usize = 50;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-owned discovery conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        let user_id = user_id.into();
        debug!(%user_id, ?title, "Conversation::new: called");
        let now = now_ms();
        Self {
            id: generate_id("conv"),
            user_id,
            title,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title derived from the opening message of a lazily created conversation
    pub fn title_from_message(message: &str) -> Option<String> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(TITLE_MAX_CHARS).collect())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

impl Record for Conversation {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "conversations"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("user_id".to_string(), IndexValue::String(self.user_id.clone()));
        fields
    }
}

/// A persisted message; `order` is strictly increasing within a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub order: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatMessage {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>, order: u32) -> Self {
        let conversation_id = conversation_id.into();
        debug!(%conversation_id, %role, order, "ChatMessage::new: called");
        let now = now_ms();
        Self {
            id: generate_id("msg"),
            conversation_id,
            role,
            content: content.into(),
            order,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

impl Record for ChatMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "messages"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert(
            "conversation_id".to_string(),
            IndexValue::String(self.conversation_id.clone()),
        );
        fields.insert("order".to_string(), IndexValue::Int(i64::from(self.order)));
        fields
    }
}

/// One turn of chat history as the pipeline sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation with its messages and blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
    pub blueprint: Blueprint,
}

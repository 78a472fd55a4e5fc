//! Conversation log shared between the session controller and its observers
//!
//! The store is append-only apart from [`ConversationStore::replace`], which
//! resolves a thinking placeholder in place. Snapshots are reference-counted
//! and never observe a half-applied mutation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Unique identifier of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human side of the conversation
    User,
    /// The automated responder
    Bot,
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Message identity, stable across placeholder resolution
    pub id: MessageId,
    /// Who wrote the message
    pub sender: Sender,
    /// Message text (empty for a thinking placeholder)
    pub text: String,
    /// True while the reply this message stands in for is pending
    pub thinking: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message authored by the user
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text.into(), false)
    }

    /// Create a message authored by the bot
    #[must_use]
    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text.into(), false)
    }

    /// Create a bot placeholder shown while a reply is generated
    #[must_use]
    pub fn thinking() -> Self {
        Self::new(Sender::Bot, String::new(), true)
    }

    fn new(sender: Sender, text: String, thinking: bool) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            text,
            thinking,
            created_at: Utc::now(),
        }
    }
}

/// Immutable view of the conversation at one point in time
pub type MessageSnapshot = Arc<Vec<ChatMessage>>;

/// Ordered log of chat messages
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    messages: MessageSnapshot,
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a bot greeting
    #[must_use]
    pub fn with_greeting(greeting: &str) -> Self {
        let mut store = Self::new();
        if !greeting.trim().is_empty() {
            store.append(ChatMessage::bot(greeting));
        }
        store
    }

    /// Append a message at the end of the log
    pub fn append(&mut self, message: ChatMessage) {
        Arc::make_mut(&mut self.messages).push(message);
    }

    /// Substitute the message with `id`, keeping its id and position
    ///
    /// Returns `false` (and leaves the log untouched) when no message has that id.
    pub fn replace(&mut self, id: MessageId, message: ChatMessage) -> bool {
        let Some(pos) = self.messages.iter().position(|m| m.id == id) else {
            tracing::warn!(%id, "replace target not found in conversation");
            return false;
        };

        let messages = Arc::make_mut(&mut self.messages);
        messages[pos] = ChatMessage { id, ..message };
        true
    }

    /// Look up a message by id
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Cheap immutable snapshot for rendering
    #[must_use]
    pub fn snapshot(&self) -> MessageSnapshot {
        Arc::clone(&self.messages)
    }

    /// Number of messages in the log
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{Message, MessageUpdate};

pub const DEFAULT_TITLE: &str = "New chat";
pub const DEFAULT_CONVERSATION_ID: &str = "default";
pub const INTERRUPTED_CONTENT: &str = "This response was interrupted before it finished.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub titled: bool,
}

impl Conversation {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: Utc::now(),
            titled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    UnknownMessage(String),
    AlreadySettled(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::UnknownMessage(id) => write!(f, "no message with id '{id}'"),
            StateError::AlreadySettled(id) => write!(f, "message '{id}' is not loading"),
        }
    }
}

impl std::error::Error for StateError {}

/// Ids handed back when an exchange starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeStart {
    pub user_message_id: String,
    pub placeholder_id: String,
    /// The active conversation had no messages before this exchange.
    pub first_exchange: bool,
}

/// Owns the conversation index and the active conversation's messages.
///
/// Only three transitions mutate messages: `begin_exchange` appends the
/// user turn plus a loading placeholder, `settle` finalizes a placeholder
/// in place, and `new_conversation` clears the active list.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: IndexMap<String, Conversation>,
    active_id: String,
    messages: Vec<Message>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let mut conversations = IndexMap::new();
        conversations.insert(
            DEFAULT_CONVERSATION_ID.to_string(),
            Conversation::new(DEFAULT_CONVERSATION_ID),
        );
        Self {
            conversations,
            active_id: DEFAULT_CONVERSATION_ID.to_string(),
            messages: Vec::new(),
        }
    }

    pub(crate) fn restore(conversation: Conversation, mut messages: Vec<Message>) -> Self {
        for message in messages.iter_mut().filter(|message| message.is_loading) {
            message.apply(MessageUpdate::content(INTERRUPTED_CONTENT));
        }
        let active_id = conversation.id.clone();
        let mut conversations = IndexMap::new();
        conversations.insert(active_id.clone(), conversation);
        Self {
            conversations,
            active_id,
            messages,
        }
    }

    pub fn new_conversation(&mut self) -> &Conversation {
        let id = Uuid::new_v4().to_string();
        self.conversations
            .insert(id.clone(), Conversation::new(id.clone()));
        self.active_id = id;
        self.messages.clear();
        self.active()
    }

    pub fn active(&self) -> &Conversation {
        &self.conversations[self.active_id.as_str()]
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn loading_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_loading)
            .count()
    }

    /// Trailing window of settled exchanges, oldest first. An exchange still
    /// in flight (its placeholder and the user turn before it) is left out.
    pub fn history(&self, window: usize) -> Vec<Message> {
        let settled: Vec<&Message> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(idx, message)| {
                let awaiting_reply = self
                    .messages
                    .get(idx + 1)
                    .is_some_and(|next| next.is_loading);
                !message.is_loading && !awaiting_reply
            })
            .map(|(_, message)| message)
            .collect();
        let skip = settled.len().saturating_sub(window);
        settled.into_iter().skip(skip).cloned().collect()
    }

    pub fn begin_exchange(&mut self, user: Message) -> ExchangeStart {
        let first_exchange = self.messages.is_empty();
        let placeholder = Message::placeholder();
        let start = ExchangeStart {
            user_message_id: user.id.clone(),
            placeholder_id: placeholder.id.clone(),
            first_exchange,
        };
        self.messages.push(user);
        self.messages.push(placeholder);
        start
    }

    pub fn settle(&mut self, id: &str, update: MessageUpdate) -> Result<&Message, StateError> {
        let message = self
            .messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or_else(|| StateError::UnknownMessage(id.to_string()))?;
        if !message.is_loading {
            return Err(StateError::AlreadySettled(id.to_string()));
        }
        message.apply(update);
        Ok(message)
    }

    /// Titles the active conversation from `user_text` unless it was titled
    /// before. Returns the new title when one was assigned.
    ///
    /// Blank text (an image-only message) leaves the conversation untitled
    /// so a later message can name it.
    pub fn title_from_first_message(&mut self, user_text: &str, max_chars: usize) -> Option<String> {
        let conversation = self.conversations.get_mut(&self.active_id)?;
        if conversation.titled || conversation.title != DEFAULT_TITLE || user_text.trim().is_empty() {
            return None;
        }
        let title = derive_title(user_text, max_chars);
        conversation.title = title.clone();
        conversation.titled = true;
        Some(title)
    }
}

pub fn derive_title(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().take(max_chars).collect::<String>() + "..."
}

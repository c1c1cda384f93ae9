use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchRecord {
    pub query: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub tool_type: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// One chat entry. Assistant messages start as placeholders
/// (`is_loading = true`) and are settled exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<WebSearchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<ToolUsage>,
}

impl Message {
    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            images,
            is_loading: false,
            reasoning: None,
            thinking: None,
            web_search: None,
            tools_used: None,
        }
    }

    pub fn placeholder() -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            images: Vec::new(),
            is_loading: true,
            reasoning: None,
            thinking: None,
            web_search: None,
            tools_used: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub(crate) fn apply(&mut self, update: MessageUpdate) {
        self.content = update.content;
        self.images = update.images;
        self.reasoning = update.reasoning;
        self.thinking = update.thinking;
        self.web_search = update.web_search;
        self.tools_used = update.tools_used;
        self.is_loading = false;
    }
}

/// Final payload written into a placeholder when the pipeline settles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: String,
    pub images: Vec<String>,
    pub reasoning: Option<String>,
    pub thinking: Option<String>,
    pub web_search: Option<WebSearchRecord>,
    pub tools_used: Option<ToolUsage>,
}

impl MessageUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

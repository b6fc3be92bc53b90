//! Message and wire types for the Sonar chat completions API

use serde::{Deserialize, Serialize};

/// Role of a chat message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    #[default]
    User,
    Assistant,
}

/// A single chat message with flattened string content
///
/// Content is always a plain string by construction. Rich content (lists of
/// text parts) is flattened once via [`MessageContent`] before a message is
/// built; the message is immutable after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Build a message from possibly-rich content, flattening it to a string
    pub fn from_content(role: ChatRole, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content: content.map(MessageContent::flatten).unwrap_or_default(),
        }
    }
}

/// Message content as accepted at the client boundary
///
/// Mirrors the OpenAI-style message shape: either a plain string or a list
/// of content parts. Non-text parts (attachments, images) are dropped when
/// flattening.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One element of a rich content list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(String),
    Typed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
    },
}

impl MessageContent {
    /// Flatten to a single string, joining text segments with newlines
    pub fn flatten(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => {
                let texts: Vec<String> = parts
                    .into_iter()
                    .filter_map(|part| match part {
                        ContentPart::Text(text) => Some(text),
                        ContentPart::Typed { kind, text } if kind == "text" => Some(text),
                        ContentPart::Typed { .. } => None,
                    })
                    .collect();
                texts.join("\n")
            }
        }
    }
}

/// Recency filter for Sonar's web search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchRecency {
    Day,
    Week,
    Month,
}

/// Request body for `POST /chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<SearchRecency>,
    pub return_citations: bool,
}

/// Response body from `POST /chat/completions`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
}

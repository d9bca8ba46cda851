//! Chat messages exchanged with a text-generation capability.
//!
//! A leaf step sends one optional system message plus one human message. The
//! reflective loop sends its whole history: the task, every draft, every
//! critique and every refine instruction, in order.

use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions and constraints for the model.
    System,
    /// Input from the user or the orchestrating step.
    Human,
    /// Text previously produced by the model.
    Assistant,
}

impl MessageRole {
    /// Wire name used by OpenAI-style chat APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::Human => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Optional participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a message with the given role.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a human message
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attach a participant name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Message text.
    pub fn text(&self) -> &str {
        &self.content
    }

    /// Check whether this message was written by the model.
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

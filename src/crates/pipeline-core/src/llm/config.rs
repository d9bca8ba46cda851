//! Request and per-call configuration types.

use crate::messages::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request to a text-generation capability.
///
/// Opaque to the pipeline: steps build it and hand it over unchanged.
///
/// # Example
///
/// ```rust
/// use pipeline_core::llm::GenerationRequest;
/// use pipeline_core::Message;
/// use std::time::Duration;
///
/// let request = GenerationRequest::new(vec![
///     Message::system("You are a routing assistant"),
///     Message::human("Book me a hotel in Paris"),
/// ])
/// .with_model("llama-3.1-8b-instant")
/// .with_temperature(0.0)
/// .with_timeout(Duration::from_secs(20));
///
/// assert_eq!(request.prompt_text(), Some("Book me a hotel in Paris"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,

    /// Per-call options.
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Create a request from messages with default options.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: GenerationOptions::default(),
        }
    }

    /// Create a request holding a single human prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![Message::human(text)])
    }

    /// Replace all options.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    /// Set the request timeout forwarded to the provider.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Text of the most recent human message, if any.
    pub fn prompt_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Human)
            .map(|m| m.text())
    }

    /// Text of the first system message, if any.
    pub fn system_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.text())
    }
}

/// Options forwarded to the provider with every request from a step.
///
/// Unset fields fall back to the provider's own configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature (provider-dependent range, usually 0.0-2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Per-request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl GenerationOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

//! Generation results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Tokens in the prompt
    pub input_tokens: usize,
    /// Tokens generated
    pub output_tokens: usize,
    /// Sum of both
    pub total_tokens: usize,
}

impl UsageMetadata {
    /// Create usage from input and output counts.
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Text produced by a generation call, plus the model that produced it.
///
/// Values are never mutated after they are returned. Composite steps that want
/// to annotate a child's result (the route taken, the loop's terminal state)
/// derive a new value with [`with_metadata`](Self::with_metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    text: String,
    model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
}

impl GenerationResult {
    /// Create a result with no usage and no metadata.
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach token usage.
    pub fn with_usage(mut self, usage: UsageMetadata) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a metadata entry, replacing any previous value for `key`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Generated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Identifier of the model that produced the text.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token usage, when the provider reported it.
    pub fn usage(&self) -> Option<&UsageMetadata> {
        self.usage.as_ref()
    }

    /// All metadata entries.
    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// A single metadata entry.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Consume the result, keeping only the text.
    pub fn into_text(self) -> String {
        self.text
    }
}

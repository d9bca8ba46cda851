//! The text-generation capability.
//!
//! # Threading and Safety
//!
//! Implementations must be `Send + Sync`: a parallel step polls several calls
//! against the same generator concurrently. Share them as
//! `Arc<dyn TextGenerator>`.

use crate::error::GenerationError;
use crate::llm::config::{GenerationOptions, GenerationRequest};
use crate::llm::response::GenerationResult;
use crate::messages::Message;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Provider-agnostic text generation.
///
/// This is the sole boundary between the pipeline and the outside world.
/// Session, memory and tool machinery of a concrete framework all live behind
/// it.
///
/// # Errors
///
/// Implementations map their failures onto [`GenerationError`] so callers can
/// tell transient failures (timeouts, quota) from permanent ones.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for the request. Called exactly once per leaf execution.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError>;

    /// Identifier used in logs and descriptions.
    fn name(&self) -> &str;

    /// Check if the provider is reachable.
    ///
    /// Default implementation assumes it is.
    async fn is_available(&self) -> bool {
        true
    }
}

/// A generator plus the options a step always sends with it.
#[derive(Clone)]
pub struct ModelBinding {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
}

impl ModelBinding {
    /// Bind a generator with default options.
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            options: GenerationOptions::default(),
        }
    }

    /// Replace the bound options.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// The bound options.
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Name of the underlying generator.
    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Send `messages` with the bound options.
    pub async fn generate(
        &self,
        messages: Vec<Message>,
    ) -> Result<GenerationResult, GenerationError> {
        let request = GenerationRequest::new(messages).with_options(self.options.clone());
        self.generator.generate(request).await
    }
}

impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBinding")
            .field("generator", &self.generator.name())
            .field("options", &self.options)
            .finish()
    }
}

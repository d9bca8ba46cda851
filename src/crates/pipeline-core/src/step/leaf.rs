//! Single generation call.

use super::{Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::{GenerationOptions, GenerationResult, ModelBinding, TextGenerator};
use crate::messages::Message;
use crate::template::PromptTemplate;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Renders its prompt from the context and calls the generator exactly once.
///
/// No retries happen here. Wrap the generator in a
/// [`RetryingGenerator`](crate::retry::RetryingGenerator) to get them.
///
/// # Example
///
/// ```rust,ignore
/// let summary = LeafStep::new("summary", model, "Summarize the key points about {topic}.")?
///     .with_system("You are a concise technical writer.")?
///     .with_options(GenerationOptions::new().with_temperature(0.2));
/// ```
#[derive(Debug, Clone)]
pub struct LeafStep {
    name: String,
    model: ModelBinding,
    system: Option<PromptTemplate>,
    prompt: PromptTemplate,
}

impl LeafStep {
    /// Create a leaf with a prompt template.
    ///
    /// # Errors
    ///
    /// Configuration error on a blank name or a malformed template.
    pub fn new(
        name: impl Into<String>,
        generator: Arc<dyn TextGenerator>,
        prompt: &str,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        Ok(Self {
            prompt: PromptTemplate::parse(prompt)?,
            name,
            model: ModelBinding::new(generator),
            system: None,
        })
    }

    /// Add a system prompt template.
    pub fn with_system(mut self, system: &str) -> Result<Self> {
        self.system = Some(PromptTemplate::parse(system)?);
        Ok(self)
    }

    /// Set the options sent with every call.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.model = self.model.with_options(options);
        self
    }

    pub fn model(&self) -> &ModelBinding {
        &self.model
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    /// Every context key the leaf reads.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.system
            .iter()
            .flat_map(|s| s.placeholders())
            .chain(self.prompt.placeholders())
    }

    /// The messages a call would send for `ctx`.
    pub fn render_messages(&self, ctx: &ExecutionContext) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.render(ctx, &self.name)?));
        }
        messages.push(Message::human(self.prompt.render(ctx, &self.name)?));
        Ok(messages)
    }

    /// Run against a shared context. Parallel branches call this directly.
    pub async fn generate(&self, ctx: &ExecutionContext) -> Result<GenerationResult> {
        let messages = self.render_messages(ctx)?;
        debug!(
            step = %self.name,
            generator = %self.model.generator_name(),
            "Calling generator"
        );

        let result = self.model.generate(messages).await?;
        debug!(step = %self.name, model = %result.model(), chars = result.text().len(), "Leaf finished");
        Ok(result)
    }
}

#[async_trait]
impl Step for LeafStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Leaf
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        self.generate(ctx).await
    }
}

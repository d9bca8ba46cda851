//! Generate → critique iteration with a bounded budget.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ↓                              │ no match, iterations < max
//! ┌──────────────────┐  draft   ┌───────────┴──────┐
//! │     Generate     │ ───────→ │     Critique     │
//! └──────────────────┘          └───┬──────────┬───┘
//!                      sentinel     │          │  no match, iterations == max
//!                                   ↓          ↓
//!                          ┌──────────┐  ┌───────────┐
//!                          │ Accepted │  │ Exhausted │
//!                          └──────────┘  └───────────┘
//! ```
//!
//! Both terminal states return the most recent draft. Running out of
//! iterations is a normal outcome, not an error.
//!
//! # Acceptance
//!
//! A critique accepts the draft when, with surrounding whitespace removed, it
//! is exactly the sentinel. The comparison is case-sensitive and a critique
//! that merely contains the sentinel among other text is a revision request.

use super::{Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::{GenerationOptions, GenerationResult, ModelBinding, TextGenerator};
use crate::messages::Message;
use crate::template::PromptTemplate;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Iteration budget used when none is configured.
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Critic prompt used when none is configured. `{task}` and `{draft}` are
/// bound by the loop on every iteration.
pub const DEFAULT_CRITIC_PROMPT: &str = "Original Task:\n{task}\n\nDraft to Review:\n{draft}";

/// Message appended before every generation after the first.
pub const DEFAULT_REFINE_INSTRUCTION: &str =
    "Please refine the draft using the critiques provided.";

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Generate,
    Critique,
    /// The critic returned the sentinel.
    Accepted,
    /// The iteration budget ran out first.
    Exhausted,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Generate => "generate",
            LoopState::Critique => "critique",
            LoopState::Accepted => "accepted",
            LoopState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Accepted | LoopState::Exhausted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The critic's judgement of one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueVerdict {
    Accepted,
    NeedsRevision,
}

impl CritiqueVerdict {
    /// Compare a trimmed critique with the sentinel, case-sensitively.
    pub fn from_critique(critique: &str, sentinel: &str) -> Self {
        if critique.trim() == sentinel {
            CritiqueVerdict::Accepted
        } else {
            CritiqueVerdict::NeedsRevision
        }
    }
}

/// Result of running the loop to a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionOutcome {
    /// The most recent draft.
    pub draft: GenerationResult,
    /// `Accepted` or `Exhausted`.
    pub state: LoopState,
    /// Generate → critique cycles completed.
    pub iterations: usize,
    /// Every critique received, oldest first.
    pub critiques: Vec<String>,
}

impl ReflectionOutcome {
    pub fn converged(&self) -> bool {
        self.state == LoopState::Accepted
    }
}

/// Iteratively improves a draft with a critic until it accepts or the budget
/// runs out.
///
/// The generator sees the whole conversation: the task, every draft, every
/// critique and a refine instruction before each new attempt. The critic only
/// sees the task and the current draft.
///
/// ```rust,ignore
/// let step = ReflectiveLoopStep::builder("factorial")
///     .generator(model.clone())
///     .critic(model)
///     .task("Write a Python function `calculate_factorial(n)`.")
///     .critic_system("Review the code. If it is perfect, respond with 'CODE_IS_PERFECT'.")
///     .sentinel("CODE_IS_PERFECT")
///     .max_iterations(3)
///     .build()?;
/// ```
pub struct ReflectiveLoopStep {
    name: String,
    generator: ModelBinding,
    critic: ModelBinding,
    task: PromptTemplate,
    critic_system: Option<PromptTemplate>,
    critic_prompt: PromptTemplate,
    refine_instruction: String,
    sentinel: String,
    max_iterations: usize,
}

impl ReflectiveLoopStep {
    pub fn builder(name: impl Into<String>) -> ReflectiveLoopBuilder {
        ReflectiveLoopBuilder {
            name: name.into(),
            generator: None,
            generator_options: GenerationOptions::default(),
            critic: None,
            critic_options: GenerationOptions::default(),
            task: None,
            critic_system: None,
            critic_prompt: DEFAULT_CRITIC_PROMPT.to_string(),
            refine_instruction: DEFAULT_REFINE_INSTRUCTION.to_string(),
            sentinel: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Run the loop to a terminal state.
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<ReflectionOutcome> {
        let task = self.task.render(ctx, &self.name)?;
        let critic_system = self
            .critic_system
            .as_ref()
            .map(|t| t.render(ctx, &self.name))
            .transpose()?;

        let mut history = vec![Message::human(task.clone())];
        let mut state = LoopState::Generate;
        let mut iterations = 0;
        let mut draft: Option<GenerationResult> = None;
        let mut critiques = Vec::new();

        info!(step = %self.name, max_iterations = self.max_iterations, "Starting reflection loop");

        while !state.is_terminal() {
            state = match state {
                LoopState::Generate => {
                    if iterations > 0 {
                        history.push(Message::human(self.refine_instruction.clone()));
                    }
                    iterations += 1;
                    debug!(step = %self.name, iteration = iterations, "Generating draft");

                    let result = self.generator.generate(history.clone()).await?;
                    history.push(Message::assistant(result.text()));
                    draft = Some(result);
                    LoopState::Critique
                }
                LoopState::Critique => {
                    let current = draft.as_ref().map(GenerationResult::text).unwrap_or_default();
                    let prompt = self.critic_prompt.render_with(
                        ctx,
                        &[("task", task.as_str()), ("draft", current)],
                        &self.name,
                    )?;

                    let mut messages = Vec::with_capacity(2);
                    if let Some(system) = &critic_system {
                        messages.push(Message::system(system.clone()));
                    }
                    messages.push(Message::human(prompt));

                    let critique = self.critic.generate(messages).await?.into_text();
                    let verdict = CritiqueVerdict::from_critique(&critique, &self.sentinel);
                    debug!(step = %self.name, iteration = iterations, verdict = ?verdict, "Critique received");

                    let next = match verdict {
                        CritiqueVerdict::Accepted => LoopState::Accepted,
                        CritiqueVerdict::NeedsRevision if iterations >= self.max_iterations => {
                            LoopState::Exhausted
                        }
                        CritiqueVerdict::NeedsRevision => {
                            history.push(Message::human(format!(
                                "Critique of the previous draft:\n{}",
                                critique
                            )));
                            LoopState::Generate
                        }
                    };
                    critiques.push(critique);
                    next
                }
                LoopState::Accepted | LoopState::Exhausted => state,
            };
        }

        info!(step = %self.name, state = %state, iterations, "Reflection loop finished");

        let draft = draft.ok_or_else(|| {
            PipelineError::configuration(format!(
                "reflective loop '{}' finished without producing a draft",
                self.name
            ))
        })?;

        Ok(ReflectionOutcome {
            draft,
            state,
            iterations,
            critiques,
        })
    }
}

/// Builder for [`ReflectiveLoopStep`].
pub struct ReflectiveLoopBuilder {
    name: String,
    generator: Option<Arc<dyn TextGenerator>>,
    generator_options: GenerationOptions,
    critic: Option<Arc<dyn TextGenerator>>,
    critic_options: GenerationOptions,
    task: Option<String>,
    critic_system: Option<String>,
    critic_prompt: String,
    refine_instruction: String,
    sentinel: Option<String>,
    max_iterations: usize,
}

impl ReflectiveLoopBuilder {
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn generator_options(mut self, options: GenerationOptions) -> Self {
        self.generator_options = options;
        self
    }

    pub fn critic(mut self, critic: Arc<dyn TextGenerator>) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn critic_options(mut self, options: GenerationOptions) -> Self {
        self.critic_options = options;
        self
    }

    /// Task template. Rendered once per run.
    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn critic_system(mut self, system: impl Into<String>) -> Self {
        self.critic_system = Some(system.into());
        self
    }

    /// Critic prompt template; `{task}` and `{draft}` are bound by the loop.
    pub fn critic_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.critic_prompt = prompt.into();
        self
    }

    pub fn refine_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.refine_instruction = instruction.into();
        self
    }

    /// Exact critique text that accepts a draft.
    pub fn sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = Some(sentinel.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Configuration error when a model, the task or the sentinel is missing,
    /// the sentinel is blank, `max_iterations` is zero, or a template is
    /// malformed.
    pub fn build(self) -> Result<ReflectiveLoopStep> {
        let name = self.name;
        let missing = |what: &str| {
            PipelineError::configuration(format!("reflective loop '{}' has no {}", name, what))
        };

        if name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        let generator = self.generator.ok_or_else(|| missing("generator"))?;
        let critic = self.critic.ok_or_else(|| missing("critic"))?;
        let task = self.task.ok_or_else(|| missing("task"))?;
        let sentinel = self.sentinel.ok_or_else(|| missing("acceptance sentinel"))?;

        let sentinel = sentinel.trim().to_string();
        if sentinel.is_empty() {
            return Err(PipelineError::configuration(format!(
                "reflective loop '{}': acceptance sentinel must not be blank",
                name
            )));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::configuration(format!(
                "reflective loop '{}': max_iterations must be at least 1",
                name
            )));
        }

        Ok(ReflectiveLoopStep {
            generator: ModelBinding::new(generator).with_options(self.generator_options),
            critic: ModelBinding::new(critic).with_options(self.critic_options),
            task: PromptTemplate::parse(task)?,
            critic_system: self.critic_system.map(PromptTemplate::parse).transpose()?,
            critic_prompt: PromptTemplate::parse(self.critic_prompt)?,
            refine_instruction: self.refine_instruction,
            sentinel,
            max_iterations: self.max_iterations,
            name,
        })
    }
}

#[async_trait]
impl Step for ReflectiveLoopStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::ReflectiveLoop
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        let outcome = self.run(ctx).await?;
        Ok(outcome
            .draft
            .with_metadata("reflection_state", outcome.state.as_str())
            .with_metadata("iterations", outcome.iterations))
    }
}

impl fmt::Debug for ReflectiveLoopStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectiveLoopStep")
            .field("name", &self.name)
            .field("generator", &self.generator)
            .field("critic", &self.critic)
            .field("sentinel", &self.sentinel)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

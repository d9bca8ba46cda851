//! Declarative pipeline definitions
//!
//! A [`PipelineDefinition`] is the serde form of a step graph. It names the
//! generation and search providers it needs; [`PipelineDefinition::build`]
//! resolves those names against an explicit [`Capabilities`] registry and
//! returns the immutable step tree.
//!
//! ```yaml
//! name: coordinator
//! providers:
//!   groq:
//!     kind: openai_compatible
//!     base_url: https://api.groq.com/openai/v1
//!     model: llama-3.1-8b-instant
//!     api_key_env: GROQ_API_KEY
//! root:
//!   type: routing
//!   name: coordinator
//!   classifier:
//!     name: classify
//!     provider: groq
//!     prompt: "Reply with one word: booker, info or unclear.\n\n{input}"
//!   branches:
//!     booker: { type: leaf, name: booker, provider: groq, prompt: "Handle the booking: {input}" }
//!     info:   { type: leaf, name: info, provider: groq, prompt: "Answer: {input}" }
//!   fallback: { type: leaf, name: unclear, provider: groq, prompt: "Ask for clarification: {input}" }
//! ```

mod loader;

pub use loader::{load_definition, parse_definition};

use crate::context::ExecutionContext;
use crate::error::{GenerationError, PipelineError, Result, SearchError};
use crate::llm::{GenerationOptions, GenerationRequest, GenerationResult, TextGenerator};
use crate::search::{SearchProvider, SearchResult};
use crate::step::{
    FallbackStep, LeafStep, ParallelStep, ReflectiveLoopStep, RoutingStep, SearchStep,
    SequentialStep, Step,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

fn default_input_key() -> String {
    "input".to_string()
}

/// A complete pipeline: providers plus the root step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Context key the driver stores the user's input under.
    #[serde(default = "default_input_key")]
    pub input_key: String,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderDefinition>,

    #[serde(default)]
    pub search: BTreeMap<String, SearchProviderDefinition>,

    pub root: StepDefinition,
}

impl PipelineDefinition {
    /// Build the step graph.
    ///
    /// # Errors
    ///
    /// Configuration error when a referenced provider is not registered in
    /// `capabilities`, any step is invalid, or a parallel branch would merge
    /// over the input key.
    pub fn build(&self, capabilities: &Capabilities) -> Result<Arc<dyn Step>> {
        let root = self.root.build(capabilities)?;
        if root.merged_keys().contains(&self.input_key.as_str()) {
            return Err(PipelineError::configuration(format!(
                "pipeline '{}': a parallel branch is named after the input key '{}'",
                self.name, self.input_key
            )));
        }
        Ok(root)
    }

    /// A fresh context holding `input` under the input key plus `extra`.
    pub fn initial_context<I, K, V>(&self, input: impl Into<String>, extra: I) -> ExecutionContext
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ctx: ExecutionContext = extra.into_iter().collect();
        ctx.insert(self.input_key.clone(), input);
        ctx
    }
}

/// A generation backend declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderDefinition {
    /// Any `/chat/completions` endpoint (OpenAI, Groq, ...).
    OpenaiCompatible {
        #[serde(default)]
        base_url: Option<String>,
        model: String,
        /// Environment variable holding the API key.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default)]
        organization: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// A local Ollama server.
    Ollama {
        #[serde(default)]
        base_url: Option<String>,
        model: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl ProviderDefinition {
    pub fn model(&self) -> &str {
        match self {
            ProviderDefinition::OpenaiCompatible { model, .. } => model,
            ProviderDefinition::Ollama { model, .. } => model,
        }
    }
}

/// A search backend declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchProviderDefinition {
    /// Google Custom Search JSON API.
    Google {
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default)]
        engine_id_env: Option<String>,
        #[serde(default)]
        base_url: Option<String>,
    },
}

/// Per-step generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl OptionsDefinition {
    pub fn to_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafDefinition {
    pub name: String,
    pub provider: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub options: OptionsDefinition,
}

impl LeafDefinition {
    pub fn build(&self, capabilities: &Capabilities) -> Result<LeafStep> {
        let generator = capabilities.generator(&self.provider)?;
        let mut leaf = LeafStep::new(&self.name, generator, &self.prompt)?
            .with_options(self.options.to_options());
        if let Some(system) = &self.system {
            leaf = leaf.with_system(system)?;
        }
        Ok(leaf)
    }
}

/// A search followed by one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDefinition {
    pub name: String,
    /// Name of the search provider.
    pub search: String,
    /// Query template.
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_key: Option<String>,
    /// The generation call that reads the results.
    pub answer: LeafDefinition,
}

/// One child of a sequential step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Context key the child's text is stored under.
    pub key: String,
    pub step: StepDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialDefinition {
    pub name: String,
    pub steps: Vec<StageDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelDefinition {
    pub name: String,
    pub branches: Vec<LeafDefinition>,
    pub merge: LeafDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDefinition {
    pub name: String,
    pub classifier: LeafDefinition,
    pub branches: BTreeMap<String, StepDefinition>,
    pub fallback: Box<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectiveLoopDefinition {
    pub name: String,
    /// Provider that writes drafts.
    pub generator: String,
    #[serde(default)]
    pub generator_options: OptionsDefinition,
    /// Provider that critiques drafts. Defaults to the generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic: Option<String>,
    #[serde(default)]
    pub critic_options: OptionsDefinition,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine_instruction: Option<String>,
    pub sentinel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

/// A primary step with a fallback run when a backend call in it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDefinition {
    pub name: String,
    pub primary: Box<StepDefinition>,
    pub fallback: Box<StepDefinition>,
    /// Key holding `"true"`/`"false"` once the primary ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_key: Option<String>,
    /// Key holding the primary's error message when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_key: Option<String>,
}

/// Any step, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDefinition {
    Leaf(LeafDefinition),
    Search(SearchDefinition),
    Sequential(SequentialDefinition),
    Parallel(ParallelDefinition),
    Routing(RoutingDefinition),
    ReflectiveLoop(ReflectiveLoopDefinition),
    Fallback(FallbackDefinition),
}

impl StepDefinition {
    pub fn name(&self) -> &str {
        match self {
            StepDefinition::Leaf(d) => &d.name,
            StepDefinition::Search(d) => &d.name,
            StepDefinition::Sequential(d) => &d.name,
            StepDefinition::Parallel(d) => &d.name,
            StepDefinition::Routing(d) => &d.name,
            StepDefinition::ReflectiveLoop(d) => &d.name,
            StepDefinition::Fallback(d) => &d.name,
        }
    }

    /// Build this step and its children.
    pub fn build(&self, capabilities: &Capabilities) -> Result<Arc<dyn Step>> {
        let step: Arc<dyn Step> = match self {
            StepDefinition::Leaf(d) => Arc::new(d.build(capabilities)?),

            StepDefinition::Search(d) => {
                let mut step = SearchStep::new(
                    &d.name,
                    capabilities.search_provider(&d.search)?,
                    &d.query,
                    d.answer.build(capabilities)?,
                )?;
                if let Some(max_results) = d.max_results {
                    step = step.with_max_results(max_results)?;
                }
                if let Some(key) = &d.results_key {
                    step = step.with_results_key(key)?;
                }
                Arc::new(step)
            }

            StepDefinition::Sequential(d) => {
                let mut builder = SequentialStep::builder(&d.name);
                for stage in &d.steps {
                    builder = builder.then(&stage.key, stage.step.build(capabilities)?);
                }
                Arc::new(builder.build()?)
            }

            StepDefinition::Parallel(d) => {
                let branches = d
                    .branches
                    .iter()
                    .map(|b| b.build(capabilities))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(ParallelStep::new(
                    &d.name,
                    branches,
                    d.merge.build(capabilities)?,
                )?)
            }

            StepDefinition::Routing(d) => {
                let mut builder = RoutingStep::builder(&d.name, d.classifier.build(capabilities)?);
                for (label, branch) in &d.branches {
                    builder = builder.branch(label, branch.build(capabilities)?);
                }
                builder = builder.fallback(d.fallback.build(capabilities)?);
                if let Some(label) = &d.fallback_label {
                    builder = builder.fallback_label(label);
                }
                if let Some(key) = &d.decision_key {
                    builder = builder.decision_key(key);
                }
                Arc::new(builder.build()?)
            }

            StepDefinition::ReflectiveLoop(d) => {
                let generator = capabilities.generator(&d.generator)?;
                let critic = match &d.critic {
                    Some(name) => capabilities.generator(name)?,
                    None => generator.clone(),
                };

                let mut builder = ReflectiveLoopStep::builder(&d.name)
                    .generator(generator)
                    .generator_options(d.generator_options.to_options())
                    .critic(critic)
                    .critic_options(d.critic_options.to_options())
                    .task(&d.task)
                    .sentinel(&d.sentinel);
                if let Some(system) = &d.critic_system {
                    builder = builder.critic_system(system);
                }
                if let Some(prompt) = &d.critic_prompt {
                    builder = builder.critic_prompt(prompt);
                }
                if let Some(instruction) = &d.refine_instruction {
                    builder = builder.refine_instruction(instruction);
                }
                if let Some(max) = d.max_iterations {
                    builder = builder.max_iterations(max);
                }
                Arc::new(builder.build()?)
            }

            StepDefinition::Fallback(d) => {
                let mut step = FallbackStep::new(
                    &d.name,
                    d.primary.build(capabilities)?,
                    d.fallback.build(capabilities)?,
                )?;
                if let Some(key) = &d.failure_key {
                    step = step.with_failure_key(key)?;
                }
                if let Some(key) = &d.error_key {
                    step = step.with_error_key(key)?;
                }
                Arc::new(step)
            }
        };

        Ok(step)
    }
}

/// Named generation and search providers a definition is built against.
///
/// Passed explicitly to [`PipelineDefinition::build`]; there is no global
/// registry.
#[derive(Clone, Default)]
pub struct Capabilities {
    generators: BTreeMap<String, Arc<dyn TextGenerator>>,
    search: BTreeMap<String, Arc<dyn SearchProvider>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(
        mut self,
        name: impl Into<String>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    pub fn with_search(mut self, name: impl Into<String>, search: Arc<dyn SearchProvider>) -> Self {
        self.search.insert(name.into(), search);
        self
    }

    /// Look up a generator by provider name.
    pub fn generator(&self, name: &str) -> Result<Arc<dyn TextGenerator>> {
        self.generators.get(name).cloned().ok_or_else(|| {
            PipelineError::configuration(format!("unknown generation provider '{}'", name))
        })
    }

    /// Look up a search provider by name.
    pub fn search_provider(&self, name: &str) -> Result<Arc<dyn SearchProvider>> {
        self.search.get(name).cloned().ok_or_else(|| {
            PipelineError::configuration(format!("unknown search provider '{}'", name))
        })
    }

    /// Offline stand-ins for every provider a definition declares.
    ///
    /// Enough to build and inspect the step graph without credentials or
    /// network access. Running it fails with `Unavailable` errors.
    pub fn placeholders(definition: &PipelineDefinition) -> Self {
        let generators = definition
            .providers
            .keys()
            .map(|name| {
                let generator: Arc<dyn TextGenerator> = Arc::new(Offline(name.clone()));
                (name.clone(), generator)
            })
            .collect();
        let search = definition
            .search
            .keys()
            .map(|name| {
                let provider: Arc<dyn SearchProvider> = Arc::new(Offline(name.clone()));
                (name.clone(), provider)
            })
            .collect();

        Self { generators, search }
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("search", &self.search.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Offline(String);

#[async_trait]
impl TextGenerator for Offline {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> std::result::Result<GenerationResult, GenerationError> {
        Err(GenerationError::Unavailable(format!(
            "provider '{}' is an offline placeholder",
            self.0
        )))
    }

    fn name(&self) -> &str {
        &self.0
    }

    async fn is_available(&self) -> bool {
        false
    }
}

#[async_trait]
impl SearchProvider for Offline {
    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
    ) -> std::result::Result<Vec<SearchResult>, SearchError> {
        Err(SearchError::Configuration(format!(
            "search provider '{}' is an offline placeholder",
            self.0
        )))
    }

    fn name(&self) -> &str {
        &self.0
    }
}

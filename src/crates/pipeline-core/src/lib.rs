//! # pipeline-core - Composable LLM Agent Pipelines
//!
//! Build multi-step agent pipelines out of a handful of step kinds and run
//! them against any text-generation backend.
//!
//! ## Overview
//!
//! - **Leaf steps** render a prompt template and call a generator exactly once
//! - **Sequential steps** chain children, feeding each output to later ones
//! - **Parallel steps** fan out independent leaves concurrently, then merge
//! - **Routing steps** classify the input and run exactly one branch
//! - **Reflective loops** iterate generate → critique until accepted or out of budget
//! - **Search steps** ground one generation call in web search results
//! - **Fallback steps** run a second step when a backend call in the first fails
//!
//! The crate owns control flow only. Talking to a model is behind the
//! [`TextGenerator`] trait and searching is behind [`SearchProvider`];
//! concrete HTTP clients live in the `llm` crate.
//!
//! ## Core Concepts
//!
//! ### Steps are immutable
//!
//! Every step validates its configuration when it is built (duplicate output
//! keys, a router without a fallback, a zero iteration budget, malformed
//! templates) and cannot change afterwards. A built graph can be run any
//! number of times.
//!
//! ### One context per run
//!
//! An [`ExecutionContext`] holds the run's named text values. It is created by
//! the driver, threaded through the graph by `&mut`, and discarded at the end.
//! Parallel branches only read it; their outputs are merged after the join.
//!
//! ### Errors
//!
//! Leaves and sequences fail fast. Parallel steps wait for every branch and
//! report all failures together. Routers treat an unusable classification as
//! a fallback, not an error. Reflective loops treat an exhausted budget as a
//! normal outcome. See [`error`] for the full hierarchy.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeline_core::{ExecutionContext, LeafStep, SequentialStep, Step};
//! use std::sync::Arc;
//!
//! let extract = LeafStep::new(
//!     "extract",
//!     model.clone(),
//!     "Extract the technical specifications from the following text:\n\n{input}",
//! )?;
//! let transform = LeafStep::new(
//!     "transform",
//!     model,
//!     "Transform the following specifications into a JSON object with 'cpu', \
//!      'memory' and 'storage' as keys:\n\n{specifications}",
//! )?;
//!
//! let chain = SequentialStep::builder("spec_to_json")
//!     .then("specifications", Arc::new(extract))
//!     .then("json", Arc::new(transform))
//!     .build()?;
//!
//! let mut ctx = ExecutionContext::new()
//!     .with_value("input", "The new laptop has a 3.5 GHz octa-core CPU, 16GB RAM and a 1TB SSD.");
//! let result = chain.execute(&mut ctx).await?;
//! println!("{}", result.text());
//! ```
//!
//! ## Declarative Pipelines
//!
//! The same graphs can be described in YAML and built against an explicit
//! [`Capabilities`] registry; see [`definition`].

pub mod context;
pub mod definition;
pub mod error;
pub mod llm;
pub mod messages;
pub mod retry;
pub mod search;
pub mod step;
pub mod template;

pub use context::ExecutionContext;
pub use definition::{
    load_definition, parse_definition, Capabilities, PipelineDefinition, ProviderDefinition,
    SearchProviderDefinition, StepDefinition,
};
pub use error::{
    AggregateError, BranchFailure, ClassificationError, GenerationError, PipelineError, Result,
    SearchError,
};
pub use llm::{
    GenerationOptions, GenerationRequest, GenerationResult, ModelBinding, TextGenerator,
    UsageMetadata,
};
pub use messages::{Message, MessageRole};
pub use retry::{RetryPolicy, RetryState, RetryingGenerator};
pub use search::{format_results, SearchProvider, SearchResult, NO_SEARCH_RESULTS};
pub use step::{
    describe_tree, CritiqueVerdict, FallbackStep, LeafStep, LoopState, ParallelStep,
    ReflectionOutcome, ReflectiveLoopStep, RoutingDecision, RoutingStep, SearchStep,
    SequentialStep, Step, StepKind,
};
pub use template::PromptTemplate;

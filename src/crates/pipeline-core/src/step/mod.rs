//! Step kinds and the trait they share.
//!
//! A pipeline is a tree of steps. Leaves ([`LeafStep`], [`SearchStep`]) call a
//! capability; composite steps ([`SequentialStep`], [`ParallelStep`],
//! [`RoutingStep`], [`ReflectiveLoopStep`], [`FallbackStep`]) arrange their
//! children and own them. Every composite is validated when it is built, so a step value that
//! exists is a step that can run.
//!
//! ```text
//! RoutingStep "router"
//! ├── classifier:      LeafStep
//! ├── simple:          LeafStep
//! ├── reasoning:       LeafStep
//! ├── internet_search: SearchStep
//! │                    └── answer: LeafStep
//! └── other:           LeafStep
//! ```

mod fallback;
mod leaf;
mod parallel;
mod reflective;
mod routing;
mod search;
mod sequential;

pub use fallback::{FallbackStep, DEFAULT_ERROR_KEY, DEFAULT_FAILURE_KEY};
pub use leaf::LeafStep;
pub use parallel::ParallelStep;
pub use reflective::{
    CritiqueVerdict, LoopState, ReflectionOutcome, ReflectiveLoopBuilder, ReflectiveLoopStep,
    DEFAULT_CRITIC_PROMPT, DEFAULT_MAX_ITERATIONS, DEFAULT_REFINE_INSTRUCTION,
};
pub use routing::{
    parse_classification, BranchLabel, LabelSet, RoutingDecision, RoutingStep,
    RoutingStepBuilder, DEFAULT_DECISION_KEY, DEFAULT_FALLBACK_LABEL,
};
pub use search::{SearchStep, DEFAULT_RESULTS_KEY};
pub use sequential::{SequentialStep, SequentialStepBuilder};

use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::GenerationResult;
use async_trait::async_trait;
use std::fmt;

/// The kind of a step, for descriptions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Leaf,
    Search,
    Sequential,
    Parallel,
    Routing,
    ReflectiveLoop,
    Fallback,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Leaf => "leaf",
            StepKind::Search => "search",
            StepKind::Sequential => "sequential",
            StepKind::Parallel => "parallel",
            StepKind::Routing => "routing",
            StepKind::ReflectiveLoop => "reflective_loop",
            StepKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of a pipeline.
///
/// `execute` receives the run's context mutably so composite steps can record
/// child outputs for later siblings. Leaves only read it.
#[async_trait]
pub trait Step: Send + Sync {
    /// Step name, unique among its siblings.
    fn name(&self) -> &str;

    fn kind(&self) -> StepKind;

    /// Run the step against `ctx`.
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult>;

    /// Direct children, each with the label its parent knows it by.
    fn children(&self) -> Vec<(String, &dyn Step)> {
        Vec::new()
    }

    /// Every context key this step or a descendant may write.
    fn produced_keys(&self) -> Vec<&str> {
        self.children()
            .into_iter()
            .flat_map(|(_, child)| child.produced_keys())
            .collect()
    }

    /// Keys written with [`ExecutionContext::merge_disjoint`]. These must not
    /// be present in the context when the writing step runs.
    fn merged_keys(&self) -> Vec<&str> {
        self.children()
            .into_iter()
            .flat_map(|(_, child)| child.merged_keys())
            .collect()
    }
}

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Reject `step` when it merges a key that is already in `written`.
pub(crate) fn ensure_no_merge_collision<'a>(
    parent: &str,
    written: impl IntoIterator<Item = &'a str>,
    step: &dyn Step,
) -> Result<()> {
    let written: Vec<&str> = written.into_iter().collect();
    let merged = step.merged_keys();
    match merged.iter().find(|key| written.iter().any(|w| w == *key)) {
        Some(key) => Err(PipelineError::configuration(format!(
            "step '{}': '{}' merges key '{}', which is already written earlier in the run",
            parent,
            step.name(),
            key
        ))),
        None => Ok(()),
    }
}

/// Render a step tree as indented text.
///
/// ```text
/// support_router (routing)
///   booker: booker (leaf)
///   info: info (leaf)
///   unclear: unclear (leaf)
/// ```
pub fn describe_tree(step: &dyn Step) -> String {
    let mut out = String::new();
    write_tree(&mut out, None, step, 0);
    out
}

fn write_tree(out: &mut String, label: Option<&str>, step: &dyn Step, depth: usize) {
    out.push_str(&"  ".repeat(depth));
    if let Some(label) = label {
        out.push_str(label);
        out.push_str(": ");
    }
    out.push_str(&format!("{} ({})\n", step.name(), step.kind()));

    for (child_label, child) in step.children() {
        write_tree(out, Some(&child_label), child, depth + 1);
    }
}

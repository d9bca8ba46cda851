//! Concurrent fan-out with an explicit merge.

use super::{LeafStep, Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{AggregateError, BranchFailure, PipelineError, Result};
use crate::llm::GenerationResult;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Runs independent leaves concurrently against one context snapshot, then
/// hands their outputs to a merge leaf.
///
/// # Semantics
///
/// - Every branch reads the same `&ExecutionContext`; none can see another's
///   output. A branch whose templates name a sibling is rejected at build time.
/// - All branches run to completion. A failing branch does not cancel the
///   others.
/// - Any failure fails the whole step with an [`AggregateError`] listing every
///   failed branch; successful results are dropped.
/// - On success the branch texts are written into the context under the branch
///   names (never overwriting an existing key) and the merge leaf runs.
#[derive(Debug, Clone)]
pub struct ParallelStep {
    name: String,
    branches: Vec<LeafStep>,
    merge: LeafStep,
}

impl ParallelStep {
    /// Create a parallel step.
    ///
    /// # Errors
    ///
    /// Configuration error when `branches` is empty, two branches share a
    /// name, or a branch reads a sibling's output.
    pub fn new(name: impl Into<String>, branches: Vec<LeafStep>, merge: LeafStep) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        if branches.is_empty() {
            return Err(PipelineError::configuration(format!(
                "parallel step '{}' has no branches",
                name
            )));
        }

        let mut names = HashSet::new();
        for branch in &branches {
            if !names.insert(branch.name()) {
                return Err(PipelineError::configuration(format!(
                    "parallel step '{}': branch name '{}' is used twice",
                    name,
                    branch.name()
                )));
            }
        }

        for branch in &branches {
            if let Some(key) = branch.placeholders().find(|key| names.contains(key)) {
                return Err(PipelineError::configuration(format!(
                    "parallel step '{}': branch '{}' reads '{}', which is produced by a sibling branch",
                    name,
                    branch.name(),
                    key
                )));
            }
        }

        Ok(Self {
            name,
            branches,
            merge,
        })
    }

    /// Branch names in declaration order.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.name())
    }

    pub fn merge_step(&self) -> &LeafStep {
        &self.merge
    }

    /// Run every branch concurrently and collect the results by branch name.
    pub async fn run_branches(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<BTreeMap<String, GenerationResult>> {
        info!(step = %self.name, branches = self.branches.len(), "Dispatching parallel branches");

        let outcomes = join_all(self.branches.iter().map(|branch| branch.generate(ctx))).await;

        let mut results = BTreeMap::new();
        let mut failures = Vec::new();
        for (branch, outcome) in self.branches.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    results.insert(branch.name().to_string(), result);
                }
                Err(error) => {
                    warn!(step = %self.name, branch = %branch.name(), error = %error, "Branch failed");
                    failures.push(BranchFailure {
                        branch: branch.name().to_string(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(AggregateError {
                step: self.name.clone(),
                failures,
            }
            .into());
        }

        debug!(step = %self.name, "All branches succeeded");
        Ok(results)
    }
}

#[async_trait]
impl Step for ParallelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Parallel
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        let results = self.run_branches(ctx).await?;
        let names: Vec<Value> = self.branch_names().map(Value::from).collect();

        ctx.merge_disjoint(
            results
                .into_iter()
                .map(|(branch, result)| (branch, result.into_text())),
        )?;

        let merged = self.merge.generate(ctx).await?;
        Ok(merged.with_metadata("branches", names))
    }

    fn children(&self) -> Vec<(String, &dyn Step)> {
        self.branches
            .iter()
            .map(|b| (b.name().to_string(), b as &dyn Step))
            .chain(std::iter::once((
                "merge".to_string(),
                &self.merge as &dyn Step,
            )))
            .collect()
    }

    fn produced_keys(&self) -> Vec<&str> {
        self.branch_names().collect()
    }

    fn merged_keys(&self) -> Vec<&str> {
        self.branch_names().collect()
    }
}

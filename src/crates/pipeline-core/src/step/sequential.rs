//! Ordered composition.

use super::{ensure_no_merge_collision, Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::GenerationResult;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

struct Stage {
    key: String,
    step: Arc<dyn Step>,
}

/// Runs children strictly in order, writing each child's text into the
/// context under its key before the next child starts.
///
/// Returns the last child's result. The first failure aborts the chain and is
/// returned unchanged.
///
/// ```rust,ignore
/// let chain = SequentialStep::builder("spec_to_json")
///     .then("specifications", Arc::new(extract))
///     .then("json", Arc::new(transform))
///     .build()?;
/// ```
pub struct SequentialStep {
    name: String,
    stages: Vec<Stage>,
}

impl SequentialStep {
    pub fn builder(name: impl Into<String>) -> SequentialStepBuilder {
        SequentialStepBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Output keys in execution order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for [`SequentialStep`].
pub struct SequentialStepBuilder {
    name: String,
    stages: Vec<Stage>,
}

impl SequentialStepBuilder {
    /// Append a child whose text will be stored under `key`.
    pub fn then(mut self, key: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.stages.push(Stage {
            key: key.into(),
            step,
        });
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Configuration error on an empty chain, a blank key, a repeated key, or
    /// a child that merges a key an earlier stage already wrote.
    pub fn build(self) -> Result<SequentialStep> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::configuration(format!(
                "sequential step '{}' has no children",
                self.name
            )));
        }

        {
            let mut seen = HashSet::new();
            for stage in &self.stages {
                if stage.key.trim().is_empty() {
                    return Err(PipelineError::configuration(format!(
                        "sequential step '{}': output key for '{}' must not be empty",
                        self.name,
                        stage.step.name()
                    )));
                }
                if !seen.insert(stage.key.as_str()) {
                    return Err(PipelineError::configuration(format!(
                        "sequential step '{}': output key '{}' is used twice",
                        self.name, stage.key
                    )));
                }
            }
        }

        {
            let mut written: Vec<&str> = Vec::new();
            for stage in &self.stages {
                ensure_no_merge_collision(
                    &self.name,
                    written.iter().copied(),
                    stage.step.as_ref(),
                )?;
                written.extend(stage.step.produced_keys());
                written.push(stage.key.as_str());
            }
        }

        Ok(SequentialStep {
            name: self.name,
            stages: self.stages,
        })
    }
}

#[async_trait]
impl Step for SequentialStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Sequential
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        info!(step = %self.name, stages = self.stages.len(), "Starting sequential step");

        let mut last = None;
        for (index, stage) in self.stages.iter().enumerate() {
            debug!(step = %self.name, index, child = %stage.step.name(), key = %stage.key, "Running stage");
            let result = stage.step.execute(ctx).await?;
            ctx.insert(stage.key.clone(), result.text());
            last = Some(result);
        }

        last.ok_or_else(|| {
            PipelineError::configuration(format!("sequential step '{}' has no children", self.name))
        })
    }

    fn children(&self) -> Vec<(String, &dyn Step)> {
        self.stages
            .iter()
            .map(|s| (s.key.clone(), s.step.as_ref()))
            .collect()
    }

    fn produced_keys(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flat_map(|s| {
                let mut keys = s.step.produced_keys();
                keys.push(s.key.as_str());
                keys
            })
            .collect()
    }
}

impl fmt::Debug for SequentialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialStep")
            .field("name", &self.name)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

//! Primary step with a fallback on backend failure.

use super::{ensure_no_merge_collision, Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::GenerationResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Context key holding `"true"` or `"false"` after the primary ran.
pub const DEFAULT_FAILURE_KEY: &str = "primary_failed";

/// Context key holding the primary's error message when it failed.
pub const DEFAULT_ERROR_KEY: &str = "primary_error";

/// Runs `primary`; if a backend call inside it fails, records the failure in
/// the context and runs `fallback` instead.
///
/// Only capability failures (generation, search, parallel aggregate) trigger
/// the fallback. A missing context key or a context collision means the graph
/// itself is wrong and is returned unchanged. An error from the fallback is
/// returned as is.
///
/// ```rust,ignore
/// let lookup = FallbackStep::new("location", Arc::new(precise), Arc::new(general_area))?;
/// ```
pub struct FallbackStep {
    name: String,
    primary: Arc<dyn Step>,
    fallback: Arc<dyn Step>,
    failure_key: String,
    error_key: String,
}

impl FallbackStep {
    /// Create a fallback step with the default failure and error keys.
    ///
    /// # Errors
    ///
    /// Configuration error on a blank name, or when `fallback` merges a key
    /// the primary or the failure record may already have written.
    pub fn new(
        name: impl Into<String>,
        primary: Arc<dyn Step>,
        fallback: Arc<dyn Step>,
    ) -> Result<Self> {
        Self {
            name: name.into(),
            primary,
            fallback,
            failure_key: DEFAULT_FAILURE_KEY.to_string(),
            error_key: DEFAULT_ERROR_KEY.to_string(),
        }
        .validated()
    }

    pub fn with_failure_key(mut self, key: impl Into<String>) -> Result<Self> {
        self.failure_key = key.into();
        self.validated()
    }

    pub fn with_error_key(mut self, key: impl Into<String>) -> Result<Self> {
        self.error_key = key.into();
        self.validated()
    }

    pub fn failure_key(&self) -> &str {
        &self.failure_key
    }

    pub fn error_key(&self) -> &str {
        &self.error_key
    }

    fn validated(self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        if self.failure_key.trim().is_empty() || self.error_key.trim().is_empty() {
            return Err(PipelineError::configuration(format!(
                "fallback step '{}': failure and error keys must not be empty",
                self.name
            )));
        }
        if self.failure_key == self.error_key {
            return Err(PipelineError::configuration(format!(
                "fallback step '{}': failure key and error key are both '{}'",
                self.name, self.failure_key
            )));
        }

        {
            let mut written = self.primary.produced_keys();
            written.push(self.failure_key.as_str());
            written.push(self.error_key.as_str());
            ensure_no_merge_collision(&self.name, written, self.fallback.as_ref())?;
        }

        Ok(self)
    }
}

#[async_trait]
impl Step for FallbackStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Fallback
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        match self.primary.execute(ctx).await {
            Ok(result) => {
                ctx.insert(self.failure_key.clone(), "false");
                Ok(result.with_metadata("fallback_used", false))
            }
            Err(error) if error.is_capability_failure() => {
                warn!(
                    step = %self.name,
                    primary = %self.primary.name(),
                    error = %error,
                    "Primary failed, running fallback"
                );
                ctx.insert(self.failure_key.clone(), "true");
                ctx.insert(self.error_key.clone(), error.to_string());

                let result = self.fallback.execute(ctx).await?;
                info!(step = %self.name, fallback = %self.fallback.name(), "Fallback finished");
                Ok(result.with_metadata("fallback_used", true))
            }
            Err(error) => Err(error),
        }
    }

    fn children(&self) -> Vec<(String, &dyn Step)> {
        vec![
            ("primary".to_string(), self.primary.as_ref()),
            ("fallback".to_string(), self.fallback.as_ref()),
        ]
    }

    fn produced_keys(&self) -> Vec<&str> {
        let mut keys = self.primary.produced_keys();
        keys.push(self.failure_key.as_str());
        keys.push(self.error_key.as_str());
        keys.extend(self.fallback.produced_keys());
        keys
    }
}

impl fmt::Debug for FallbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStep")
            .field("name", &self.name)
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("failure_key", &self.failure_key)
            .finish()
    }
}

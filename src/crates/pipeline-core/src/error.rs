//! Error types for pipeline construction and execution
//!
//! Every failure a pipeline can surface is one of the enums in this module.
//! All of them implement `std::error::Error` via `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! PipelineError
//! ├── Generation         - The text-generation capability failed (timeout, quota, ...)
//! ├── Search             - The search capability failed
//! ├── Aggregate          - One or more parallel branches failed
//! ├── Configuration      - Invalid step graph, rejected at construction time
//! ├── MissingContextKey  - A prompt placeholder had no value in the context
//! └── ContextCollision   - A parallel merge would overwrite an existing key
//! ```
//!
//! [`ClassificationError`] is deliberately absent from the hierarchy: a routing
//! step turns it into a fallback decision and never propagates it.
//!
//! # Propagation
//!
//! | Step | Policy |
//! |------|--------|
//! | Leaf / Search | Fail fast, error returned as-is |
//! | Sequential | Fail fast, remaining children skipped |
//! | Parallel | Wait for every branch, report all failures in one [`AggregateError`] |
//! | Routing | Classification ambiguity → fallback branch; branch failures propagate |
//! | Reflective loop | Exhausting the iteration budget is a normal outcome, not an error |
//!
//! # Example
//!
//! ```rust
//! use pipeline_core::error::{GenerationError, PipelineError};
//!
//! fn describe(err: &PipelineError) -> &'static str {
//!     match err {
//!         PipelineError::Generation(e) if e.is_retryable() => "transient",
//!         PipelineError::Configuration(_) => "fix the pipeline definition",
//!         _ => "failed",
//!     }
//! }
//!
//! let err = PipelineError::from(GenerationError::Timeout("30s elapsed".into()));
//! assert_eq!(describe(&err), "transient");
//! ```

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure reported by a text-generation capability.
///
/// Provider adapters map their transport-level errors onto these variants so
/// the pipeline (and any retry decorator around it) can reason about them
/// without knowing which provider produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request did not complete within its timeout.
    #[error("Generation timed out: {0}")]
    Timeout(String),

    /// Rate limit or quota exhausted.
    #[error("Rate limit or quota exceeded: {0}")]
    RateLimited(String),

    /// The provider answered, but the payload could not be understood.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Network-level failure before a response was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials missing or rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider reachable but not serving (model not loaded, 5xx, ...).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Any other provider-reported failure.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Check if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Timeout(_)
                | GenerationError::RateLimited(_)
                | GenerationError::Transport(_)
                | GenerationError::Unavailable(_)
        )
    }
}

/// Failure reported by a search capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Network failure or non-success HTTP status.
    #[error("Search transport error: {0}")]
    Transport(String),

    /// The search backend returned a payload that could not be parsed.
    #[error("Malformed search response: {0}")]
    MalformedResponse(String),

    /// Missing credentials or engine identifier.
    #[error("Search configuration error: {0}")]
    Configuration(String),
}

/// Why a classifier's output could not be mapped onto a branch label.
///
/// Only ever observed inside [`RoutingStep`](crate::step::RoutingStep), which
/// routes to its fallback branch instead of returning it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// The classifier returned nothing but whitespace.
    #[error("classifier returned an empty response")]
    Empty,

    /// The classifier returned a label outside the configured set.
    #[error("classifier returned unknown label '{0}'")]
    UnknownLabel(String),
}

/// One failed branch of a parallel step.
#[derive(Debug, Error)]
#[error("branch '{branch}': {error}")]
pub struct BranchFailure {
    /// Name of the branch that failed
    pub branch: String,
    /// The branch's own error
    #[source]
    pub error: PipelineError,
}

/// Every failure collected from a parallel step's branches.
///
/// Branches are never cancelled when a sibling fails, so this carries one
/// entry per failed branch, in branch declaration order.
#[derive(Debug, Error)]
#[error("Parallel step '{step}' failed in {} branch(es): {}", .failures.len(), summarize(.failures))]
pub struct AggregateError {
    /// Name of the parallel step
    pub step: String,
    /// All branch failures, in declaration order
    pub failures: Vec<BranchFailure>,
}

impl AggregateError {
    /// Names of the branches that failed.
    pub fn failed_branches(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.branch.as_str())
    }
}

fn summarize(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error for building and running pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The text-generation capability failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The search capability failed.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// One or more parallel branches failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The step graph is invalid.
    ///
    /// Raised by constructors and definition builders, never while a
    /// correctly built pipeline is running.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A prompt placeholder has no value in the execution context.
    #[error("Step '{step}' references missing context key '{key}'")]
    MissingContextKey {
        /// Step whose template was being rendered
        step: String,
        /// The placeholder name
        key: String,
    },

    /// Merging parallel results would overwrite a key already in the context.
    #[error("Context key '{key}' is already set")]
    ContextCollision {
        /// The colliding key
        key: String,
    },
}

impl PipelineError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Create a missing-context-key error.
    pub fn missing_key(step: impl Into<String>, key: impl Into<String>) -> Self {
        PipelineError::MissingContextKey {
            step: step.into(),
            key: key.into(),
        }
    }

    /// Check if this error was raised while building a pipeline.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    /// Check if a backend call failed, as opposed to the graph or its inputs
    /// being wrong.
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Generation(_) | PipelineError::Search(_) | PipelineError::Aggregate(_)
        )
    }

    /// The underlying generation error, if this is one.
    pub fn as_generation(&self) -> Option<&GenerationError> {
        match self {
            PipelineError::Generation(e) => Some(e),
            _ => None,
        }
    }
}

//! Retry with exponential backoff for transient generation failures
//!
//! Steps never retry on their own: a leaf calls its generator exactly once.
//! Callers that want retries wrap the generator in a [`RetryingGenerator`]
//! before handing it to a step, so every step built on top of it inherits the
//! policy.
//!
//! ```text
//! delay = initial_interval × backoff_factor ^ attempt
//! delay = min(delay, max_interval)
//! if jitter: delay ×= random(0.5..=1.5)
//! ```
//!
//! Only errors for which [`GenerationError::is_retryable`] holds are retried.
//! Authentication failures, malformed payloads and other provider errors are
//! returned on the first occurrence.
//!
//! # Example
//!
//! ```rust,ignore
//! use pipeline_core::retry::{RetryPolicy, RetryingGenerator};
//! use std::sync::Arc;
//!
//! let generator = Arc::new(RetryingGenerator::new(
//!     client,
//!     RetryPolicy::new(4).with_initial_interval(2.0).with_max_interval(30.0),
//! ));
//! let step = LeafStep::new("summarize", generator, "Summarize: {topic}")?;
//! ```

use crate::error::GenerationError;
use crate::llm::{GenerationRequest, GenerationResult, TextGenerator};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` attempts in total.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 60.0,
            jitter: true,
        }
    }

    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
    ///
    /// Never panics: a negative or NaN delay is zero and a delay too large
    /// for [`Duration`] (including an infinite cap) saturates to
    /// [`Duration::MAX`].
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        if final_delay.is_nan() || final_delay <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(final_delay).unwrap_or(Duration::MAX)
    }

    /// Check if another attempt is allowed after `attempts` attempts.
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Attempts made so far and the most recent error.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<GenerationError>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, error: GenerationError) {
        self.attempts += 1;
        self.last_error = Some(error);
    }
}

/// [`TextGenerator`] decorator that retries transient failures.
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
    name: String,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        let name = format!("{} (retry x{})", inner.name(), policy.max_attempts);
        Self {
            inner,
            policy,
            name,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let mut state = RetryState::new();

        loop {
            match self.inner.generate(request.clone()).await {
                Ok(result) => {
                    if state.attempts > 0 {
                        debug!(
                            generator = %self.inner.name(),
                            attempts = state.attempts + 1,
                            "Generation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(error) if error.is_retryable() => {
                    state.record_failure(error.clone());
                    if !self.policy.should_retry(state.attempts) {
                        warn!(
                            generator = %self.inner.name(),
                            attempts = state.attempts,
                            error = %error,
                            "Retries exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.policy.calculate_delay(state.attempts - 1);
                    warn!(
                        generator = %self.inner.name(),
                        attempt = state.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient generation failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

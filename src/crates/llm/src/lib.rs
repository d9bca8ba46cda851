//! HTTP providers for `pipeline-core`.
//!
//! Each client implements one of the pipeline's capability traits:
//!
//! | Client | Trait | Endpoint |
//! |--------|-------|----------|
//! | [`OpenAiCompatibleClient`] | [`TextGenerator`] | `POST {base_url}/chat/completions` (OpenAI, Groq, ...) |
//! | [`OllamaClient`] | [`TextGenerator`] | `POST {base_url}/api/chat` |
//! | [`GoogleSearchClient`] | [`SearchProvider`] | Google Custom Search JSON API |
//!
//! Transport failures are mapped onto [`GenerationError`] / [`SearchError`]
//! so retry decorators can tell transient failures from permanent ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{OpenAiCompatibleClient, RemoteLlmConfig};
//! use pipeline_core::{LeafStep, RetryPolicy, RetryingGenerator};
//! use std::sync::Arc;
//!
//! let config = RemoteLlmConfig::from_env("OPENAI_API_KEY", llm::config::OPENAI_BASE_URL, "gpt-4o-mini")?;
//! let model = Arc::new(RetryingGenerator::new(
//!     Arc::new(OpenAiCompatibleClient::new(config)?),
//!     RetryPolicy::default(),
//! ));
//!
//! let leaf = LeafStep::new("answer", model, "Answer briefly: {input}")?;
//! ```
//!
//! [`TextGenerator`]: pipeline_core::TextGenerator
//! [`SearchProvider`]: pipeline_core::SearchProvider
//! [`GenerationError`]: pipeline_core::GenerationError
//! [`SearchError`]: pipeline_core::SearchError

pub mod config;
pub mod error;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

#[cfg(feature = "search")]
pub mod search;

pub use config::{LocalLlmConfig, RemoteLlmConfig};
pub use error::{LlmError, Result};

#[cfg(feature = "local")]
pub use local::OllamaClient;
#[cfg(feature = "remote")]
pub use remote::OpenAiCompatibleClient;
#[cfg(feature = "search")]
pub use search::{GoogleSearchClient, GoogleSearchConfig};

//! Text-generation capability traits and types.
//!
//! The pipeline does not talk to any provider directly. Every step that needs
//! generated text goes through a [`TextGenerator`], which callers implement
//! (or take from the `llm` crate) and hand to the step at construction time.
//!
//! ```rust,ignore
//! use pipeline_core::llm::{GenerationRequest, TextGenerator};
//! use std::sync::Arc;
//!
//! let model: Arc<dyn TextGenerator> = Arc::new(MyClient::new());
//!
//! let request = GenerationRequest::prompt("Summarize the history of space exploration")
//!     .with_temperature(0.3);
//!
//! let result = model.generate(request).await?;
//! println!("{} said: {}", result.model(), result.text());
//! ```

pub mod config;
pub mod response;
pub mod traits;

pub use config::{GenerationOptions, GenerationRequest};
pub use response::{GenerationResult, UsageMetadata};
pub use traits::{ModelBinding, TextGenerator};

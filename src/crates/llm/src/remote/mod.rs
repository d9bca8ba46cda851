//! Hosted, API-key authenticated providers.

mod openai;

pub use openai::OpenAiCompatibleClient;

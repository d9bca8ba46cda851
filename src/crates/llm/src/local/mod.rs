//! Providers served from the local machine or network.

mod ollama;

pub use ollama::OllamaClient;

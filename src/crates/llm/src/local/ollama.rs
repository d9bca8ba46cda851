//! Ollama client implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::local::OllamaClient;
//! use llm::config::LocalLlmConfig;
//! use pipeline_core::{GenerationRequest, TextGenerator};
//!
//! let client = OllamaClient::new(LocalLlmConfig::new("http://localhost:11434", "llama3.2"))?;
//! let result = client.generate(GenerationRequest::prompt("Hello!")).await?;
//! ```

use crate::config::LocalLlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use pipeline_core::{
    GenerationError, GenerationRequest, GenerationResult, Message, TextGenerator, UsageMetadata,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for a local Ollama server's `/api/chat` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    config: LocalLlmConfig,
    client: Client,
    name: String,
}

impl OllamaClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// [`LlmError::HttpError`] if the HTTP client cannot be initialized.
    pub fn new(config: LocalLlmConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        let name = format!("ollama:{}", config.model);
        Ok(Self {
            config,
            client,
            name,
        })
    }

    /// Override the name reported in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &LocalLlmConfig {
        &self.config
    }

    /// Check if the Ollama server is running.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn convert_message(msg: &Message) -> OllamaMessage {
        OllamaMessage {
            role: msg.role.as_str().to_string(),
            content: msg.text().to_string(),
        }
    }

    fn build_body(&self, request: &GenerationRequest) -> OllamaRequest {
        let mut options = BTreeMap::new();
        if let Some(temp) = request.options.temperature {
            options.insert("temperature", serde_json::Value::from(temp));
        }
        if let Some(max_tokens) = request.options.max_tokens {
            options.insert("num_predict", serde_json::Value::from(max_tokens));
        }

        OllamaRequest {
            model: request
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            stream: false,
            options: if options.is_empty() {
                None
            } else {
                Some(options)
            },
        }
    }

    fn convert_response(resp: OllamaResponse) -> GenerationResult {
        let mut result = GenerationResult::new(resp.message.content, resp.model);
        if let (Some(prompt), Some(eval)) = (resp.prompt_eval_count, resp.eval_count) {
            result = result.with_usage(UsageMetadata::new(prompt, eval));
        }
        if let Some(duration) = resp.total_duration {
            result = result.with_metadata("total_duration_ns", duration);
        }
        result
    }

    async fn chat(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let url = format!("{}/api/chat", self.config.base_url);
        let body = self.build_body(&request);
        let timeout = request.options.timeout.unwrap_or(self.config.timeout);

        debug!(provider = %self.name, model = %body.model, "Sending Ollama chat request");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ServiceUnavailable(format!(
                        "Ollama not reachable at {}: {}",
                        self.config.base_url, e
                    ))
                } else {
                    LlmError::HttpError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("Ollama", status, error_text));
        }

        let ollama_resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(Self::convert_response(ollama_resp))
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResult, GenerationError> {
        self.chat(request).await.map_err(GenerationError::from)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.check_health().await
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<BTreeMap<&'static str, serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}
